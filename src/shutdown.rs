//! Graceful Shutdown Module
//!
//! Handles graceful shutdown: signal handling, notifying the accept loop,
//! and persisting the upload registry before exit.

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::registry::UploadRegistry;
use crate::{Result, UploadError};

/// Shutdown coordinator for graceful system shutdown
pub struct ShutdownCoordinator {
    registry: Option<Arc<UploadRegistry>>,
    shutdown_sender: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

/// Receiver half handed to components that must wind down on shutdown.
pub struct ShutdownSignal {
    receiver: broadcast::Receiver<()>,
}

impl ShutdownSignal {
    /// Wait until shutdown is initiated.
    pub async fn wait_for_shutdown(&mut self) {
        // A closed channel means the coordinator is gone; treat it the same
        let _ = self.receiver.recv().await;
    }
}

impl ShutdownCoordinator {
    /// Create new shutdown coordinator
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_sender, _) = broadcast::channel(16);
        Self {
            registry: None,
            shutdown_sender,
            shutdown_timeout,
        }
    }

    /// Set the registry to persist during shutdown
    pub fn set_registry(&mut self, registry: Arc<UploadRegistry>) {
        self.registry = Some(registry);
    }

    /// Get a shutdown signal for components to listen on
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.shutdown_sender.subscribe(),
        }
    }

    /// Block until SIGINT or SIGTERM, then run the shutdown sequence.
    pub async fn listen_for_shutdown(&self) -> Result<()> {
        let mut sigint =
            signal::unix::signal(signal::unix::SignalKind::interrupt()).map_err(|e| {
                UploadError::SystemError(format!("failed to create SIGINT handler: {}", e))
            })?;
        let mut sigterm =
            signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
                UploadError::SystemError(format!("failed to create SIGTERM handler: {}", e))
            })?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }

        self.initiate_shutdown().await
    }

    /// Initiate graceful shutdown sequence
    pub async fn initiate_shutdown(&self) -> Result<()> {
        info!("Initiating graceful shutdown sequence");

        // Notify listeners; an error just means no one is listening
        let _ = self.shutdown_sender.send(());

        if let Some(registry) = &self.registry {
            match timeout(self.shutdown_timeout, registry.persist()).await {
                Ok(Ok(())) => {
                    info!("Upload registry persisted, records={}", registry.len().await);
                }
                Ok(Err(e)) => {
                    error!("Failed to persist upload registry on shutdown: {}", e);
                }
                Err(_) => {
                    warn!(
                        "Registry persistence timed out after {:?}",
                        self.shutdown_timeout
                    );
                }
            }
        }

        info!("Shutdown sequence complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_initiate_shutdown_persists_registry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("uploads.db");
        let registry = Arc::new(UploadRegistry::load(path.clone()).await.unwrap());
        registry.create("persisted").await;

        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        coordinator.set_registry(Arc::clone(&registry));

        let mut signal = coordinator.subscribe();
        coordinator.initiate_shutdown().await.unwrap();

        // Signal was broadcast and the registry landed on disk
        signal.wait_for_shutdown().await;
        let reloaded = UploadRegistry::load(path).await.unwrap();
        assert!(reloaded.contains("persisted").await);
    }
}
