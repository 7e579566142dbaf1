use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use traffic_pipeline::config::{otlp_endpoint, Config};
use traffic_pipeline::consumer::{run_consumer, ConsumerSettings, DeadLetter};
use traffic_pipeline::observability::{init_tracing, shutdown_tracing};
use traffic_pipeline::queue::AzureQueueClient;
use traffic_pipeline::store::{build_pool, PgSensorStore};

#[derive(Debug, Parser)]
#[command(about = "Drain the storage queue into SensorData, then exit once the queue stays empty.")]
struct Args {
    /// Create the SensorData table before draining if it does not exist.
    #[arg(long)]
    ensure_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing("traffic-consumer", otlp_endpoint().as_deref())?;
    let config = Config::from_env()?;

    let queue = AzureQueueClient::from_config(&config.queue).context("build queue client")?;
    tracing::info!(account = %config.queue.account_name, "connected to storage account");
    tracing::info!(queue = %config.queue.queue_name, "using existing queue");

    let pool = build_pool(&config.sql).await?;
    let store = PgSensorStore::new(pool);
    if args.ensure_schema {
        store.ensure_schema().await?;
        tracing::info!("SensorData table ready");
    }

    let poison_queue = match config.poison_dequeue_limit {
        Some(_) => {
            let poison = queue
                .for_queue(&config.queue.poison_queue_name)
                .context("build poison queue client")?;
            poison
                .ensure_exists()
                .await
                .context("create poison queue")?;
            Some(poison)
        }
        None => None,
    };
    let dead_letter = poison_queue
        .as_ref()
        .zip(config.poison_dequeue_limit)
        .map(|(poison, max_dequeue_count)| DeadLetter {
            queue: poison,
            max_dequeue_count,
        });

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupted; finishing current message");
                cancel.cancel();
            }
        }
    });

    let settings = ConsumerSettings::from_config(&config);
    let result = run_consumer(&queue, &store, dead_letter, &settings, &cancel).await;
    store.close().await;
    shutdown_tracing();

    let report = result.context("consumer aborted")?;
    println!("Total messages processed: {}", report.processed);
    Ok(())
}
