// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mail capability: deliver a message to an agent with acknowledgement.
//!
//! The orchestrator consumes mail as a send capability — delivery details
//! belong to the transport. The in-process implementation types the
//! message into the agent's pane and announces it on the agent's mail
//! topic; a send error means the agent was not notified.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::agent::AgentSnapshot;
use crate::error::OpResult;
use crate::event;
use crate::hub::EventBus;
use crate::mux::Multiplexer;

/// Boxed future shorthand for the object-safe trait method.
pub type MailFuture<'a> = Pin<Box<dyn Future<Output = OpResult<()>> + Send + 'a>>;

/// Send a message to one agent. `Ok(())` means the delivery was
/// acknowledged by the transport.
pub trait MailSender: Send + Sync + 'static {
    fn send<'a>(
        &'a self,
        to: &'a AgentSnapshot,
        subject: &'a str,
        body: &'a str,
    ) -> MailFuture<'a>;
}

/// Delivers mail by typing it into the recipient's pane.
pub struct PaneMail {
    mux: Arc<dyn Multiplexer>,
    bus: Arc<EventBus>,
}

impl PaneMail {
    pub fn new(mux: Arc<dyn Multiplexer>, bus: Arc<EventBus>) -> Self {
        Self { mux, bus }
    }
}

impl MailSender for PaneMail {
    fn send<'a>(
        &'a self,
        to: &'a AgentSnapshot,
        subject: &'a str,
        body: &'a str,
    ) -> MailFuture<'a> {
        Box::pin(async move {
            let message = format!("[{}] {subject}\n{body}", to.name());
            self.mux.send_keys(&to.pane_id, &message, true).await?;
            self.bus.emit(
                event::mail_topic(to.name()),
                event::MAIL_RECEIVED,
                serde_json::json!({
                    "to": to.name(),
                    "pane_id": to.pane_id,
                    "subject": subject,
                }),
            );
            Ok(())
        })
    }
}
