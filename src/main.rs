//! docfeed document delivery service.
//!
//! Reads NDJSON events from stdin and delivers each one to the configured
//! document store. Undeliverable events go to the dead-letter file.

use std::sync::Arc;

use anyhow::{Context, Result};
use docfeed::{init_tracing, Config, Pipeline};
use docfeed_core::DeadLetterSink;
use docfeed_delivery::{
    dead_letter::{DiscardDeadLetterSink, JsonLinesDeadLetterSink},
    DeliveryEngine,
};
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(config.log_format)?;

    info!(
        base_url = %config.base_url,
        namespace = %config.namespace,
        document_type = %config.document_type,
        workers = config.workers,
        "Starting docfeed"
    );

    let sink = open_dead_letter_sink(&config).await?;
    let engine = DeliveryEngine::new(config.to_delivery_config()?, sink)
        .context("failed to create delivery engine")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown signal received, finishing in-flight deliveries");
            shutdown.cancel();
        }
    });

    let pipeline = Pipeline::new(engine, config.workers, shutdown);
    let stats = pipeline.run(BufReader::new(tokio::io::stdin())).await?;

    info!(
        delivered = stats.delivered,
        dead_lettered = stats.dead_lettered,
        rejected = stats.rejected,
        "docfeed shutdown complete"
    );
    Ok(())
}

async fn open_dead_letter_sink(config: &Config) -> Result<Arc<dyn DeadLetterSink>> {
    match &config.dead_letter_path {
        Some(path) => {
            let sink = JsonLinesDeadLetterSink::open(path)
                .await
                .with_context(|| format!("failed to open dead-letter file {}", path.display()))?;
            info!(path = %path.display(), "Dead-letter file opened");
            Ok(Arc::new(sink))
        },
        None => {
            warn!("No dead-letter-path configured, undeliverable events will be discarded");
            Ok(Arc::new(DiscardDeadLetterSink))
        },
    }
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
