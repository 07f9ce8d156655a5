use std::sync::Arc;
use std::time::Duration;

use filedrop::config::Config;
use filedrop::gateway::Gateway;
use filedrop::registry::UploadRegistry;
use filedrop::shutdown::ShutdownCoordinator;
use filedrop::storage::UploadStore;
use filedrop::{logging, Result, UploadError};
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    let _log_guard = logging::initialize(&config)?;

    info!(
        "Starting filedrop {} (built {})",
        env!("BUILD_VERSION"),
        env!("BUILD_TIMESTAMP")
    );

    let registry = Arc::new(UploadRegistry::load(config.registry_path.clone()).await?);
    let store = Arc::new(UploadStore::new(config.uploads_dir.clone()).await?);

    let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(config.shutdown_timeout_secs));
    shutdown.set_registry(Arc::clone(&registry));

    let addr = config.socket_addr()?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        UploadError::IoError(format!("failed to bind {}: {}", addr, e))
    })?;

    let gateway = Arc::new(Gateway::new(config, registry, store));
    let server_signal = shutdown.subscribe();
    let server = tokio::spawn(async move { gateway.serve(listener, server_signal).await });

    shutdown.listen_for_shutdown().await?;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Upload server exited with error: {}", e),
        Err(e) => error!("Upload server task panicked: {}", e),
    }

    info!("filedrop stopped");
    Ok(())
}
