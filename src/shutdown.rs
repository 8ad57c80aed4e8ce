use actix_web::dev::ServerHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::worker::JobRunner;

/// Handles graceful shutdown of the application
///
/// This module orchestrates graceful shutdown by:
/// 1. Listening for shutdown signals (SIGTERM, SIGINT/CTRL+C)
/// 2. Stopping the HTTP server (stops accepting new uploads and submissions)
/// 3. Waiting, up to a grace period, for running jobs to record COMPLETED
///
/// Worker processes are never killed here. Any still running at the deadline
/// keep running, and their ledgers stay at SUBMITTED.
pub struct ShutdownCoordinator {
    server_handle: ServerHandle,
    server_task: JoinHandle<Result<(), std::io::Error>>,
    runner: Arc<JobRunner>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new(
        server_handle: ServerHandle,
        server_task: JoinHandle<Result<(), std::io::Error>>,
        runner: Arc<JobRunner>,
        grace: Duration,
    ) -> Self {
        Self {
            server_handle,
            server_task,
            runner,
            grace,
        }
    }

    /// Wait for shutdown signal and perform graceful shutdown
    pub async fn wait_for_shutdown(self) -> Result<(), std::io::Error> {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for CTRL+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received CTRL+C signal, initiating graceful shutdown...");
            }
            _ = terminate => {
                info!("Received SIGTERM signal, initiating graceful shutdown...");
            }
        }

        self.shutdown().await
    }

    /// Perform the actual shutdown sequence
    async fn shutdown(self) -> Result<(), std::io::Error> {
        // 1. Stop HTTP server (no new submissions)
        info!("Stopping HTTP server (no longer accepting new requests)...");
        self.server_handle.stop(true).await;

        match self.server_task.await {
            Ok(Ok(_)) => info!("HTTP server shut down successfully"),
            Ok(Err(e)) => error!("HTTP server encountered error during shutdown: {:?}", e),
            Err(e) => error!("HTTP server task panicked: {:?}", e),
        }

        // 2. Let running jobs record their completion
        let in_flight = self.runner.in_flight();
        if in_flight > 0 {
            info!(
                "Waiting up to {:?} for {} running job(s) to complete...",
                self.grace, in_flight
            );
            if tokio::time::timeout(self.grace, self.runner.drain()).await.is_err() {
                warn!(
                    "Grace period elapsed with jobs still running; they keep running but will not be recorded as completed"
                );
            } else {
                info!("All running jobs recorded completion");
            }
        }

        info!("Graceful shutdown completed successfully");
        Ok(())
    }
}
