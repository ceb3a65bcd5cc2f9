// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::agent::{AgentRegistry, AgentType, RegisterAgent};
use crate::reservation::ReservationRegistry;
use crate::test_support::{live_bus, FakeMail, StaticSource};
use crate::triage::{RecKind, RecStatus, Recommendation, RecommendationCache};

fn rec(id: &str, kind: RecKind, status: RecStatus, score: f64) -> Recommendation {
    Recommendation {
        id: id.to_owned(),
        title: format!("item {id}"),
        kind,
        status,
        priority: 2,
        base_score: score,
        breakdown: None,
        unblocks_ids: vec![],
        blocked_by: vec![],
    }
}

struct Fixture {
    coordinator: Coordinator,
    agents: Arc<AgentRegistry>,
    mail: Arc<FakeMail>,
    bus: Arc<crate::hub::EventBus>,
}

async fn fixture(recs: Vec<Recommendation>) -> Fixture {
    let agents = Arc::new(AgentRegistry::new(Duration::from_secs(60)));
    let reservations = Arc::new(ReservationRegistry::new());
    let cache = Arc::new(RecommendationCache::new(
        StaticSource::new(recs),
        Duration::from_secs(60),
        50,
    ));
    let mail = FakeMail::new();
    let (bus, _shutdown) = live_bus(1024);

    agents
        .register(RegisterAgent {
            pane_id: "%0".to_owned(),
            pane_index: 0,
            session: "dev".to_owned(),
            agent_type: AgentType::Claude,
            mail_name: Some("worker-claude".to_owned()),
        })
        .await;
    agents
        .register(RegisterAgent {
            pane_id: "%1".to_owned(),
            pane_index: 1,
            session: "dev".to_owned(),
            agent_type: AgentType::Codex,
            mail_name: Some("worker-codex".to_owned()),
        })
        .await;

    let coordinator = Coordinator::new(
        Arc::clone(&agents),
        reservations,
        cache,
        Arc::clone(&mail) as Arc<dyn crate::mail::MailSender>,
        Arc::clone(&bus),
        CoordinatorConfig::default(),
    );
    Fixture { coordinator, agents, mail, bus }
}

#[tokio::test]
async fn assigns_idle_agents_and_notifies_them() {
    let f = fixture(vec![
        rec("R1", RecKind::Epic, RecStatus::Open, 0.8),
        rec("R2", RecKind::Chore, RecStatus::Open, 0.6),
        rec("R3", RecKind::Task, RecStatus::Blocked, 0.9),
    ])
    .await;

    let results = f.coordinator.tick().await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.message_sent));
    assert!(results.iter().all(|r| r.assignment.recommendation.id != "R3"));

    // Both agents were notified and flipped to working.
    let deliveries = f.mail.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().any(|(to, subject, _)| {
        to == "worker-claude" && subject == "work assignment: R1"
    }));
    for pane in ["%0", "%1"] {
        assert_eq!(f.agents.get(pane).await.unwrap().status, AgentStatus::Working);
    }

    // work.assigned was stored after the mail side-effect.
    let events = f.bus.store().get_since(0, &["sessions:dev".to_owned()], 100);
    let assigned: Vec<_> =
        events.events.iter().filter(|e| e.event_type == "work.assigned").collect();
    assert_eq!(assigned.len(), 2);
    assert_eq!(assigned[0].data["message_sent"], true);
}

#[tokio::test]
async fn next_tick_skips_working_agents() {
    let f = fixture(vec![
        rec("R1", RecKind::Task, RecStatus::Open, 0.8),
        rec("R2", RecKind::Task, RecStatus::Open, 0.7),
        rec("R3", RecKind::Task, RecStatus::Open, 0.6),
    ])
    .await;

    let first = f.coordinator.tick().await.unwrap();
    assert_eq!(first.len(), 2);

    // Everyone is working now; nothing to assign.
    let second = f.coordinator.tick().await.unwrap();
    assert!(second.is_empty());

    // One agent frees up and picks up the next-ranked item.
    f.agents.set_status("%0", AgentStatus::Idle).await;
    let third = f.coordinator.tick().await.unwrap();
    assert_eq!(third.len(), 1);
    // R1/R2 were taken in the first tick; the cache still serves the same
    // snapshot, so the freed agent gets the best-ranked item again (the
    // tracker is the source of truth for completion, not the coordinator).
    assert_eq!(third[0].assignment.agent.pane_id, "%0");
}

#[tokio::test]
async fn mail_failure_is_recorded_not_retried() {
    let f = fixture(vec![rec("R1", RecKind::Task, RecStatus::Open, 0.8)]).await;
    f.mail.fail.store(true, std::sync::atomic::Ordering::SeqCst);

    let results = f.coordinator.tick().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(!results[0].message_sent);
    assert!(f.mail.deliveries().is_empty());

    // The assignment is still recorded, with message_sent = false.
    let events = f.bus.store().get_since(0, &[], 100);
    let assigned = events
        .events
        .iter()
        .find(|e| e.event_type == "work.assigned")
        .unwrap();
    assert_eq!(assigned.data["message_sent"], false);
}

#[tokio::test]
async fn no_idle_agents_short_circuits_without_triage_call() {
    let f = fixture(vec![rec("R1", RecKind::Task, RecStatus::Open, 0.8)]).await;
    f.agents.set_status("%0", AgentStatus::Working).await;
    f.agents.set_status("%1", AgentStatus::Working).await;

    let results = f.coordinator.tick().await.unwrap();
    assert!(results.is_empty());
    assert!(f.mail.deliveries().is_empty());
}
