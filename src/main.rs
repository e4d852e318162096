use anyhow::Result;
use std::time::{Duration, Instant};
use syncmate::sync::rsync_version;
use syncmate::utils::logging;
use syncmate::{load_config, SyncManager};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    let config = load_config()?;
    info!("Starting SyncMate engine");
    info!("Data directory: {}", config.data_dir.display());

    match rsync_version().await {
        Ok(version) => info!("Found {}", version),
        Err(e) => warn!("rsync not available: {}", e),
    }

    let manager = SyncManager::new(config).await;
    let scheduler_loop = manager.spawn_scheduler_loop();

    shutdown_signal().await;

    if manager.cancel_sync() {
        info!("Cancelled active sync run, waiting for it to stop");
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.is_run_active() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
    scheduler_loop.abort();

    info!("Engine stopped gracefully");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
