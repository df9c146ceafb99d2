//! labpoold - the lab machine reservation service
//!
//! Wires together all the components:
//! - Configuration loading and resource provisioning
//! - Store initialization and startup reconciliation
//! - Allocation engine
//! - Expiry scheduler
//! - IPC server

use anyhow::{Context, Result};
use clap::Parser;
use labpool_api::{
    Command, ErrorCode, ErrorInfo, Event, EventPayload, Response, ResponsePayload,
};
use labpool_config::load_config;
use labpool_core::{
    AllocationEngine, ExpiryScheduler, ReleaseOutcome, ResourceSeed, SessionPolicy,
};
use labpool_ipc::{IpcServer, ServerMessage};
use labpool_store::{AuditEvent, AuditEventType, SqliteStore, Store};
use labpool_util::{
    default_config_path, Clock, Identity, PoolError, SystemClock, LABPOOL_DATA_DIR_ENV,
    LABPOOL_SOCKET_ENV,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// labpoold - exclusive time-boxed access to shared lab machines
#[derive(Parser, Debug)]
#[command(name = "labpoold")]
#[command(about = "Shared lab machine reservation service", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/labpoold/config.toml)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Socket path override (or set LABPOOL_SOCKET env var)
    #[arg(short, long, env = LABPOOL_SOCKET_ENV)]
    socket: Option<PathBuf>,

    /// Data directory override (or set LABPOOL_DATA_DIR env var)
    #[arg(short, long, env = LABPOOL_DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

/// Main service state
struct Service {
    engine: Arc<AllocationEngine>,
    ipc: Arc<IpcServer>,
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    scan_interval: Duration,
}

impl Service {
    async fn new(args: &Args) -> Result<Self> {
        let config = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            resource_count = config.resources.len(),
            "Configuration loaded"
        );

        let socket_path = args
            .socket
            .clone()
            .unwrap_or_else(|| config.service.socket_path.clone());

        let data_dir = args
            .data_dir
            .clone()
            .unwrap_or_else(|| config.service.data_dir.clone());

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", data_dir))?;

        let db_path = data_dir.join("labpoold.db");
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        info!(db_path = %db_path.display(), "Store initialized");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        store.append_audit(AuditEvent::new(clock.now(), AuditEventType::ServiceStarted))?;

        let policy = SessionPolicy {
            session_minutes: config.defaults.session_minutes,
            extension_minutes: config.defaults.extension_minutes,
        };
        let engine = Arc::new(AllocationEngine::new(store.clone(), clock.clone(), policy));

        // Seed resources from config, then repair any crash artifacts.
        let mut provisioned = 0;
        for def in &config.resources {
            let inserted = engine.provision(&ResourceSeed {
                id: def.id.clone(),
                name: def.name.clone(),
                address: def.address.clone(),
                kind: def.kind,
                maintenance: def.maintenance,
            })?;
            if inserted {
                provisioned += 1;
            }
        }
        let repaired = engine.reconcile()?;
        info!(provisioned, repaired, "Pool ready");

        let mut ipc = IpcServer::new(&socket_path);
        ipc.start().await?;

        info!(socket_path = %socket_path.display(), "IPC server started");

        Ok(Self {
            engine,
            ipc: Arc::new(ipc),
            store,
            clock,
            scan_interval: config.service.scan_interval,
        })
    }

    async fn run(self) -> Result<()> {
        let ipc_ref = self.ipc.clone();
        let mut ipc_messages = ipc_ref
            .take_message_receiver()
            .await
            .context("Message receiver should be available")?;

        // Spawn IPC accept task
        let ipc_accept = ipc_ref.clone();
        tokio::spawn(async move {
            if let Err(e) = ipc_accept.run().await {
                error!(error = %e, "IPC server error");
            }
        });

        // Spawn the expiry scheduler; auto-releases come back over the
        // channel so the main loop can announce them.
        let (expired_tx, mut expired_rx) = mpsc::unbounded_channel();
        let scheduler = ExpiryScheduler::new(self.engine.clone(), self.scan_interval);
        tokio::spawn(async move { scheduler.run(expired_tx).await });

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        info!("Service running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                Some(outcome) = expired_rx.recv() => {
                    self.broadcast_release(&outcome);
                }

                Some(msg) = ipc_messages.recv() => {
                    self.handle_ipc_message(msg).await;
                }
            }
        }

        info!("Shutting down labpoold");
        self.ipc
            .broadcast_event(Event::new(self.clock.now(), EventPayload::Shutdown));

        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(self.clock.now(), AuditEventType::ServiceStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Announce a closed usage and, if the queue head took over, the
    /// promotion that followed.
    fn broadcast_release(&self, outcome: &ReleaseOutcome) {
        let now = self.clock.now();

        let payload = if outcome.auto_released {
            EventPayload::SessionExpired {
                resource_id: outcome.resource_id.clone(),
                identity: outcome.closed.identity.clone(),
                usage_id: outcome.closed.id.clone(),
            }
        } else {
            EventPayload::ResourceReleased {
                resource_id: outcome.resource_id.clone(),
                identity: outcome.closed.identity.clone(),
            }
        };
        self.ipc.broadcast_event(Event::new(now, payload));

        if let Some(promotion) = &outcome.promoted {
            self.ipc.broadcast_event(Event::new(
                now,
                EventPayload::QueuePromoted {
                    resource_id: outcome.resource_id.clone(),
                    identity: promotion.identity.clone(),
                    usage_id: promotion.usage.id.clone(),
                    ends_at: promotion.usage.ends_at(),
                },
            ));
        }
    }

    async fn handle_ipc_message(&self, msg: ServerMessage) {
        match msg {
            ServerMessage::Request { client_id, request } => {
                let response = self
                    .handle_command(request.request_id, request.identity, request.command)
                    .await;
                let _ = self.ipc.send_response(&client_id, response).await;
            }

            ServerMessage::ClientConnected { client_id } => {
                debug!(client_id = %client_id, "Client connected");
            }

            ServerMessage::ClientDisconnected { client_id } => {
                debug!(client_id = %client_id, "Client disconnected");
            }
        }
    }

    async fn handle_command(
        &self,
        request_id: u64,
        identity: Identity,
        command: Command,
    ) -> Response {
        let now = self.clock.now();

        match command {
            Command::Status { resource_id } => {
                match self.engine.status(&identity, &resource_id) {
                    Ok((snapshot, expired)) => {
                        if let Some(outcome) = expired {
                            self.broadcast_release(&outcome);
                        }
                        Response::success(request_id, ResponsePayload::Resource(snapshot))
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::StatusAll => match self.engine.status_all(&identity) {
                Ok((pool, expired)) => {
                    for outcome in &expired {
                        self.broadcast_release(outcome);
                    }
                    Response::success(request_id, ResponsePayload::Pool(pool))
                }
                Err(e) => error_response(request_id, e),
            },

            Command::Occupy { resource_id, minutes } => {
                // Zero means "use the configured default".
                let minutes = if minutes > 0 { Some(minutes) } else { None };
                match self.engine.occupy(&identity, &resource_id, minutes) {
                    Ok(outcome) => {
                        self.ipc.broadcast_event(Event::new(
                            now,
                            EventPayload::ResourceOccupied {
                                resource_id,
                                identity,
                                usage_id: outcome.usage.id.clone(),
                                ends_at: outcome.ends_at,
                            },
                        ));
                        Response::success(
                            request_id,
                            ResponsePayload::Occupied {
                                usage_id: outcome.usage.id,
                                ends_at: outcome.ends_at,
                            },
                        )
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::Release { resource_id } => {
                match self.engine.release(&identity, &resource_id) {
                    Ok(outcome) => {
                        self.broadcast_release(&outcome);
                        Response::success(
                            request_id,
                            ResponsePayload::Released {
                                promoted: outcome.promoted.map(|p| p.identity),
                            },
                        )
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::JoinQueue { resource_id, minutes } => {
                let minutes = if minutes > 0 { Some(minutes) } else { None };
                match self.engine.join_queue(&identity, &resource_id, minutes) {
                    Ok(outcome) => {
                        self.ipc.broadcast_event(Event::new(
                            now,
                            EventPayload::QueueJoined {
                                resource_id,
                                identity,
                                position: outcome.position,
                            },
                        ));
                        Response::success(
                            request_id,
                            ResponsePayload::Queued {
                                position: outcome.position,
                                estimated_wait_seconds: outcome.estimated_wait_seconds,
                            },
                        )
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::LeaveQueue { resource_id } => {
                match self.engine.leave_queue(&identity, &resource_id) {
                    Ok(()) => {
                        self.ipc.broadcast_event(Event::new(
                            now,
                            EventPayload::QueueLeft {
                                resource_id,
                                identity,
                            },
                        ));
                        Response::success(request_id, ResponsePayload::LeftQueue)
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::Extend { resource_id, minutes } => {
                let minutes = if minutes > 0 { Some(minutes) } else { None };
                match self.engine.extend(&identity, &resource_id, minutes) {
                    Ok(outcome) => {
                        self.ipc.broadcast_event(Event::new(
                            now,
                            EventPayload::TimeExtended {
                                resource_id,
                                identity,
                                added_minutes: outcome.added_minutes,
                                remaining_seconds: outcome.remaining_seconds,
                            },
                        ));
                        Response::success(
                            request_id,
                            ResponsePayload::Extended {
                                remaining_seconds: outcome.remaining_seconds,
                            },
                        )
                    }
                    Err(e) => error_response(request_id, e),
                }
            }

            Command::RunExpiryScan => match self.engine.run_expiry_scan() {
                Ok(outcomes) => {
                    for outcome in &outcomes {
                        self.broadcast_release(outcome);
                    }
                    Response::success(
                        request_id,
                        ResponsePayload::ScanComplete {
                            expired: outcomes.len(),
                        },
                    )
                }
                Err(e) => error_response(request_id, e),
            },

            Command::SubscribeEvents => {
                Response::success(request_id, ResponsePayload::Subscribed)
            }

            Command::Ping => Response::success(request_id, ResponsePayload::Pong),
        }
    }
}

fn error_response(request_id: u64, error: PoolError) -> Response {
    let code = match &error {
        PoolError::NotFound(_) => ErrorCode::NotFound,
        PoolError::Conflict(_) => ErrorCode::Conflict,
        PoolError::Forbidden(_) => ErrorCode::Forbidden,
        PoolError::Expired => ErrorCode::Expired,
        PoolError::NotQueued => ErrorCode::NotQueued,
        PoolError::NoActiveUsage => ErrorCode::NoActiveUsage,
        PoolError::Storage(_) => ErrorCode::StorageError,
    };
    Response::error(request_id, ErrorInfo::new(code, error.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "labpoold starting");

    let service = Service::new(&args).await?;
    service.run().await
}
