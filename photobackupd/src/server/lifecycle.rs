use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use shared::types::{Phase, ServerState};
use crate::api::routes::{self, AppState};
use crate::config::{Config, DiscoveryConfig};
use crate::error::Result;
use crate::mdns::advertise::{self, Advertisement, DiscoveryRecord};
use crate::server::bind;
use crate::storage::ingest::UploadIngestor;

/// Everything owned by one successful start
struct RunningServer {
    port: u16,
    /// Stops accepting and lets open requests finish
    cancel: CancellationToken,
    /// Cuts off uploads still streaming once the grace period is over
    abort: CancellationToken,
    task: JoinHandle<()>,
    advertisement: Advertisement,
}

/// Owns the single HTTP listener and its LAN advertisement.
///
/// start/stop are serialized through `running`; readers go through the watch
/// channel so `status()` never waits on a transition in flight.
pub struct ServerLifecycle {
    ingestor: Arc<UploadIngestor>,
    discovery: DiscoveryConfig,
    max_port_attempts: Option<u32>,
    shutdown_grace: Duration,
    running: Mutex<Option<RunningServer>>,
    state_tx: watch::Sender<ServerState>,
}

impl ServerLifecycle {
    pub fn new(ingestor: UploadIngestor, config: &Config) -> Self {
        let (state_tx, _) = watch::channel(ServerState::stopped());
        Self {
            ingestor: Arc::new(ingestor),
            discovery: config.discovery.clone(),
            max_port_attempts: config.server.max_port_attempts,
            shutdown_grace: Duration::from_secs(config.server.shutdown_grace_secs),
            running: Mutex::new(None),
            state_tx,
        }
    }

    /// Bind, serve, then advertise. Restarts cleanly if already running.
    ///
    /// Returns the port actually bound. A bind error leaves the server stopped.
    pub async fn start(&self, preferred_port: u16) -> Result<u16> {
        let mut running = self.running.lock().await;

        if let Some(server) = running.take() {
            tracing::info!("Server already running on port {}, restarting", server.port);
            self.shutdown(server).await;
        }

        self.state_tx.send_replace(ServerState {
            phase: Phase::Starting,
            ..ServerState::stopped()
        });

        let (listener, port) = match bind::bind(preferred_port, self.max_port_attempts).await {
            Ok(bound) => bound,
            Err(e) => {
                self.state_tx.send_replace(ServerState::stopped());
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let abort = CancellationToken::new();
        let app = routes::router(AppState::new(self.ingestor.clone(), abort.clone()));
        let server_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async move { server_cancel.cancelled().await })
                .await
            {
                tracing::error!("Server error: {}", e);
            }
        });

        self.state_tx.send_replace(ServerState {
            phase: Phase::Running,
            listening: true,
            port: Some(port),
            started_at: Some(Utc::now()),
        });
        tracing::info!("Server is running on port {}", port);

        let advertisement = if self.discovery.enabled {
            let record = DiscoveryRecord::for_local_host(&self.discovery.service_name, port);
            advertise::publish(&record, self.discovery.interface.as_deref())
        } else {
            tracing::info!("LAN discovery disabled");
            Advertisement::inactive()
        };

        *running = Some(RunningServer {
            port,
            cancel,
            abort,
            task,
            advertisement,
        });

        Ok(port)
    }

    /// Retract the advertisement and close the listener. No-op when stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        match running.take() {
            Some(server) => self.shutdown(server).await,
            None => tracing::debug!("Stop requested but server is not running"),
        }
    }

    /// Current state; never blocks
    pub fn status(&self) -> ServerState {
        self.state_tx.borrow().clone()
    }

    /// Whether an mDNS record is currently registered
    pub async fn is_advertising(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|server| server.advertisement.is_active())
    }

    async fn shutdown(&self, mut server: RunningServer) {
        self.state_tx.send_modify(|state| state.phase = Phase::Stopping);
        tracing::info!("Stopping server on port {}", server.port);

        server.advertisement.retract();
        server.cancel.cancel();

        match tokio::time::timeout(self.shutdown_grace, &mut server.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Server task failed: {}", e),
            Err(_) => {
                tracing::warn!(
                    "In-flight requests still open after {:?}, aborting them",
                    self.shutdown_grace
                );
                // Upload handlers drop their partial files and answer with an error
                server.abort.cancel();

                if tokio::time::timeout(self.shutdown_grace, &mut server.task).await.is_err() {
                    tracing::warn!("Server task did not finish, aborting");
                    server.task.abort();
                }
            }
        }

        self.state_tx.send_replace(ServerState::stopped());
        tracing::info!("Server stopped");
    }
}

impl Drop for ServerLifecycle {
    fn drop(&mut self) {
        if let Some(mut server) = self.running.get_mut().take() {
            server.advertisement.retract();
            server.cancel.cancel();
            server.abort.cancel();
        }
    }
}
