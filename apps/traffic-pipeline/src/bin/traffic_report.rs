use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use traffic_pipeline::config::{otlp_endpoint, SqlConfig};
use traffic_pipeline::observability::{init_tracing, shutdown_tracing};
use traffic_pipeline::report::{totals_by_timestamp, write_csv};
use traffic_pipeline::store::{build_pool, PgSensorStore};

#[derive(Debug, Parser)]
#[command(about = "Total vehicle counts per timestamp from SensorData, as CSV.")]
struct Args {
    /// Write the CSV here instead of stdout.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing("traffic-report", otlp_endpoint().as_deref())?;
    let sql = SqlConfig::from_env()?;

    let store = PgSensorStore::new(build_pool(&sql).await?);
    let rows = store.fetch_rows().await;
    store.close().await;
    let rows = rows?;
    let totals = totals_by_timestamp(&rows);
    tracing::info!(rows = rows.len(), timestamps = totals.len(), "aggregated SensorData");

    match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("create {}", path.display()))?;
            write_csv(&totals, BufWriter::new(file))?;
            tracing::info!(path = %path.display(), "report written");
        }
        None => write_csv(&totals, io::stdout().lock())?,
    }

    shutdown_tracing();
    Ok(())
}
