pub mod status;

use crate::app::App;
use crate::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use status::{router, AppState, HealthReport, KeySummary, StatusServer};

/// Long-running process: status routes plus the key health monitor
pub struct Server {
    app: App,
    cancellation_token: CancellationToken,
}

impl Server {
    #[must_use]
    pub fn new(app: App) -> Self {
        Self {
            app,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub async fn run(&self) -> Result<()> {
        info!("Starting resilience status server");

        let addr = self.app.config().socket_addr()?;

        let shutdown_token = self.cancellation_token.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            shutdown_token.cancel();
        });

        let monitor = match self.app.config().health_check_interval() {
            Some(interval) => {
                let probe = self.app.key_probe()?;
                Some(self.app.keys().clone().spawn_health_monitor(
                    probe,
                    interval,
                    self.app.config().probe_timeout(),
                    self.cancellation_token.child_token(),
                ))
            }
            None => {
                info!("Active key health check disabled");
                None
            }
        };

        let result = StatusServer::new(addr, self.app.status_state())
            .start(self.cancellation_token.clone().cancelled_owned())
            .await;

        // stop the monitor even if the listener failed
        self.cancellation_token.cancel();
        if let Some(monitor) = monitor {
            if let Err(e) = monitor.await {
                warn!("Key health monitor ended abnormally: {}", e);
            }
        }

        info!("Server shutdown complete");
        result
    }

    pub fn shutdown(&self) {
        warn!("Initiating server shutdown");
        self.cancellation_token.cancel();
    }

    /// Check if the server has been requested to shutdown
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!("Failed to setup SIGTERM handler: {}", e);
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = signal::ctrl_c() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl-C, initiating graceful shutdown");
    }
}
