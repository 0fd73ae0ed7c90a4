//! fl-sidecar: tails a training-progress file and republishes the latest
//! epoch/loss/accuracy values to an OTLP collector.
//!
//! # Usage
//! ```sh
//! fl-sidecar --metric-file /var/run/training/progress \
//!            --endpoint http://otel-collector:4317 --interval 60
//! ```
//!
//! # Environment Variables
//! - `POD_NAME` / `POD_NAMESPACE` - attached as resource attributes when set

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use fl_sidecar::config::Config;
use fl_sidecar::exporter::Reporter;
use fl_sidecar::parser;
use fl_sidecar::watcher::FileWatcher;
use tracing::{Level, error, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "fl-sidecar", version, about = "Training metrics sidecar")]
struct Cli {
    /// Path to the training-progress file to watch
    #[arg(long)]
    metric_file: PathBuf,

    /// OTLP/gRPC collector endpoint, e.g. http://collector:4317
    #[arg(long)]
    endpoint: String,

    /// Automatic push interval in seconds
    #[arg(long, default_value_t = 60)]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    let cli = Cli::parse();
    let config = Config::new(cli.metric_file, cli.endpoint, cli.interval);

    let reporter = Arc::new(Reporter::new(&config)?);
    let mut updates = FileWatcher::new(&config.metric_file).start();

    info!("Start watching file {}", config.metric_file.display());

    loop {
        tokio::select! {
            maybe_content = updates.recv() => {
                let Some(content) = maybe_content else {
                    error!("Watcher channel closed");
                    break;
                };
                // A slow collector must never block the next file update.
                let reporter = Arc::clone(&reporter);
                let flush_timeout = config.flush_timeout;
                tokio::spawn(async move {
                    parse_and_push(&reporter, &content, flush_timeout).await;
                });
            }
            _ = shutdown_signal() => {
                info!("Shutdown signal received, exiting");
                break;
            }
        }
    }

    // Drain once more before releasing exporter resources.
    if let Err(err) = reporter.force_flush(config.flush_timeout).await {
        warn!("Final flush failed: {err:#}");
    }
    reporter.shutdown()?;
    Ok(())
}

async fn parse_and_push(reporter: &Reporter, content: &[u8], flush_timeout: Duration) {
    let text = String::from_utf8_lossy(content);
    let metrics = match parser::parse_metrics(&text) {
        Ok(metrics) => metrics,
        Err(err) => {
            warn!("Parse content failed, content: {text:?}, err: {err}");
            return;
        }
    };

    let mut summary: Vec<String> = metrics
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    summary.sort();

    reporter.update_metrics(metrics);

    match reporter.force_flush(flush_timeout).await {
        Ok(()) => info!("Push metrics success, {}", summary.join(", ")),
        Err(err) => warn!("Force flush err: {err:#}"),
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            warn!("Failed to install SIGTERM handler: {err}");
            let _ = ctrl_c.await;
        }
    }
}
