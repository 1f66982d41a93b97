//! Worker process: runs the job engine against a WhatsApp gateway until
//! interrupted.

mod config;
mod waha;

use std::error::Error;
use std::sync::Arc;

use actors::{InMemoryQueue, JobQueue, RedisQueue};
use api::Engine;
use tracing_subscriber::EnvFilter;

use crate::config::{QueueBackend, WorkerConfig};
use crate::waha::WahaTransport;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        endpoint = %config.db.endpoint,
        workers = config.engine.worker_count,
        gateway = %config.waha.api_url,
        "Starting worker"
    );

    let queue: Arc<dyn JobQueue> = match &config.queue {
        QueueBackend::Memory => Arc::new(InMemoryQueue::new()),
        QueueBackend::Redis { url, key } => {
            tracing::info!(key = %key, "Using Redis job queue");
            Arc::new(RedisQueue::new(url, key.clone())?)
        }
    };

    let transport = WahaTransport::new(config.waha)?;
    let engine = Engine::builder(Arc::new(transport))
        .with_config(config.engine)
        .with_queue(queue)
        .connect(&config.db)
        .await?;

    shutdown_signal().await?;
    tracing::info!("Shutdown signal received");
    engine.shutdown().await?;
    tracing::info!("Worker stopped");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
