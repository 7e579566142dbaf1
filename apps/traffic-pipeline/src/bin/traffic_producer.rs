use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use traffic_pipeline::config::{otlp_endpoint, Config};
use traffic_pipeline::observability::{init_tracing, shutdown_tracing};
use traffic_pipeline::producer::{run_producer, ProducerSettings};
use traffic_pipeline::queue::AzureQueueClient;

#[derive(Debug, Parser)]
#[command(about = "Publish simulated traffic sensor readings to the storage queue.")]
struct Args {
    /// Stop after this many readings (default: run until Ctrl-C).
    #[arg(long)]
    count: Option<u64>,

    /// Delay between readings in milliseconds (overrides TRAFFIC_PUBLISH_INTERVAL_MS).
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing("traffic-producer", otlp_endpoint().as_deref())?;
    let config = Config::from_env()?;

    let queue = AzureQueueClient::from_config(&config.queue).context("build queue client")?;
    tracing::info!(account = %config.queue.account_name, "connected to storage account");
    tracing::info!(queue = %config.queue.queue_name, "using existing queue");

    let interval = match args.interval_ms {
        Some(0) => anyhow::bail!("--interval-ms must be > 0"),
        Some(ms) => Duration::from_millis(ms),
        None => config.publish_interval(),
    };
    let settings = ProducerSettings {
        interval,
        count: args.count,
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("script terminated by user");
                cancel.cancel();
            }
        }
    });

    let result = run_producer(&queue, &settings, &cancel).await;
    shutdown_tracing();
    let sent = result.context("producer stopped on a send failure")?;
    tracing::info!(sent, "producer finished");
    Ok(())
}
