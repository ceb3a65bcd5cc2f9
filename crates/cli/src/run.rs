// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level server runner — shared by `main` and the integration specs.

use std::path::PathBuf;
use std::sync::atomic::AtomicI32;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::agent::AgentRegistry;
use crate::checkpoint::CheckpointStore;
use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::event_store::EventStore;
use crate::headroom::HeadroomGuard;
use crate::hub::{EventBus, Hub};
use crate::mail::PaneMail;
use crate::mux::{Multiplexer, TmuxMux};
use crate::probe::ProcProbe;
use crate::reservation::ReservationRegistry;
use crate::streamer::StreamManager;
use crate::transport::state::{LifecycleState, ServerSettings, Store};
use crate::transport::{build_health_router, build_router};
use crate::triage::{RecommendationCache, TriageCli};

/// A fully-wired server, listening but not yet awaited.
pub struct PreparedServer {
    pub store: Arc<Store>,
    pub shutdown: CancellationToken,
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / ROOST_LOG_LEVEL > RUST_LOG > default.
    let filter = if std::env::var("ROOST_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Run the orchestrator to completion (shutdown signal or fatal error).
pub async fn run(config: Config) -> anyhow::Result<()> {
    let prepared = prepare(config).await?;
    let shutdown = prepared.shutdown.clone();
    shutdown.cancelled().await;

    // Deterministic teardown: every pane stream releases its FIFO and
    // pipe before the process exits.
    prepared.store.streams.stop_all().await;
    info!("shutdown complete");
    Ok(())
}

/// Wire every subsystem, spawn the background loops, and bind servers.
pub async fn prepare(config: Config) -> anyhow::Result<PreparedServer> {
    init_tracing(&config);
    std::fs::create_dir_all(&config.data_dir)?;

    let shutdown = CancellationToken::new();

    // Event plane: store → hub → bus.
    let event_store = Arc::new(EventStore::new(config.ring_capacity, config.durable_config()));
    let (hub, dispatcher) = Hub::new(config.hub_config());
    tokio::spawn(dispatcher.run(Arc::clone(&event_store), shutdown.clone()));
    let bus = Arc::new(EventBus::new(Arc::clone(&event_store), hub));

    if config.durable_config().is_some() {
        let store = Arc::clone(&event_store);
        let interval = config.cleaner_interval();
        let sd = shutdown.clone();
        tokio::spawn(async move { store.run_cleaner(interval, sd).await });
    }

    // Multiplexer capability.
    let mut tmux = TmuxMux::new(config.tmux_bin.clone());
    if let Some(ref socket) = config.tmux_socket {
        tmux = tmux.with_socket(socket.clone());
    }
    let mux: Arc<dyn Multiplexer> = Arc::new(tmux);

    // Agent registry + liveness groomer.
    let agents = Arc::new(AgentRegistry::new(config.liveness_window()));
    {
        let agents = Arc::clone(&agents);
        let interval = config.groom_interval();
        let sd = shutdown.clone();
        tokio::spawn(async move { agents.run_groomer(interval, sd).await });
    }

    // Reservations + TTL sweeper.
    let reservations = Arc::new(ReservationRegistry::new());
    {
        let reservations = Arc::clone(&reservations);
        let bus = Arc::clone(&bus);
        let interval = config.sweep_interval();
        let sd = shutdown.clone();
        tokio::spawn(async move { reservations.run_sweeper(&bus, interval, sd).await });
    }

    // Headroom guard over the OS probe.
    let guard =
        HeadroomGuard::new(Arc::new(ProcProbe::new()), config.headroom_config(), shutdown.clone());
    guard.attach_bus(Arc::clone(&bus));

    // Pane streaming.
    let streams =
        Arc::new(StreamManager::new(Arc::clone(&mux), Arc::clone(&bus), config.streamer_config()));

    // Checkpoints.
    let checkpoints = Arc::new(CheckpointStore::new(&config.data_dir));

    // Triage → cache → coordinator.
    let recommendations = Arc::new(RecommendationCache::new(
        Arc::new(TriageCli::new(config.triage_argv())),
        config.triage_ttl(),
        config.triage_limit,
    ));
    let mail = Arc::new(PaneMail::new(Arc::clone(&mux), Arc::clone(&bus)));
    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&agents),
        Arc::clone(&reservations),
        Arc::clone(&recommendations),
        mail,
        Arc::clone(&bus),
        config.coordinator_config(),
    ));
    if !config.no_coordinator {
        let coordinator = Arc::clone(&coordinator);
        let sd = shutdown.clone();
        tokio::spawn(async move { coordinator.run(sd).await });
    }

    let store = Arc::new(Store {
        bus,
        agents,
        reservations,
        guard,
        streams,
        checkpoints,
        mux,
        coordinator,
        recommendations,
        config: ServerSettings {
            started_at: Instant::now(),
            auth_token: config.auth_token.clone(),
            working_dir: config.working_dir(),
            catchup_limit: config.catchup_limit,
        },
        lifecycle: LifecycleState { shutdown: shutdown.clone(), ws_client_count: AtomicI32::new(0) },
    });

    // HTTP server (TCP).
    if let Some(port) = config.port {
        let router = build_router(Arc::clone(&store));
        let addr = format!("{}:{}", config.host, port);
        let listener = TcpListener::bind(&addr).await?;
        info!("HTTP listening on {}", listener.local_addr()?);
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let result =
                axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
            if let Err(e) = result {
                error!("HTTP server error: {e}");
            }
        });
    }

    // HTTP server (Unix socket).
    if let Some(ref socket_path) = config.socket {
        let router = build_router(Arc::clone(&store));
        let path = PathBuf::from(socket_path);
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path)?;
        info!("Unix socket listening on {}", path.display());
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut make_svc = router.into_make_service();
            loop {
                tokio::select! {
                    _ = sd.cancelled() => break,
                    accept = listener.accept() => {
                        match accept {
                            Ok((stream, _)) => {
                                let svc_future = <_ as tower::Service<_>>::call(&mut make_svc, ());
                                tokio::spawn(async move {
                                    let Ok(svc) = svc_future.await;
                                    let io = hyper_util::rt::TokioIo::new(stream);
                                    let hyper_svc =
                                        hyper_util::service::TowerToHyperService::new(svc);
                                    let _ = hyper_util::server::conn::auto::Builder::new(
                                        hyper_util::rt::TokioExecutor::new(),
                                    )
                                    .serve_connection_with_upgrades(io, hyper_svc)
                                    .await;
                                });
                            }
                            Err(e) => {
                                tracing::debug!("unix socket accept error: {e}");
                            }
                        }
                    }
                }
            }
        });
    }

    // Health-only port.
    if let Some(health_port) = config.health_port {
        let router = build_health_router(Arc::clone(&store));
        let addr = format!("{}:{}", config.host, health_port);
        let listener = TcpListener::bind(&addr).await?;
        info!("health probe listening on {addr}");
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let result =
                axum::serve(listener, router).with_graceful_shutdown(sd.cancelled_owned()).await;
            if let Err(e) = result {
                error!("health server error: {e}");
            }
        });
    }

    // Signal handler: first signal drains, second forces exit.
    {
        let sd = shutdown.clone();
        tokio::spawn(async move {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
            let mut sigint =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT");
                }
            }
            sd.cancel();

            tokio::select! {
                _ = async {
                    if let Some(ref mut s) = sigterm { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGTERM again, forcing exit");
                }
                _ = async {
                    if let Some(ref mut s) = sigint { s.recv().await } else { std::future::pending().await }
                } => {
                    info!("received SIGINT again, forcing exit");
                }
            }
            std::process::exit(130);
        });
    }

    Ok(PreparedServer { store, shutdown })
}
