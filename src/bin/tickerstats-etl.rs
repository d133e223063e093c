//! Ticker statistics ETL
//!
//! Run with: `cargo run --bin tickerstats-etl`
//!
//! Reads `FIRST_NAME` / `LAST_NAME` and optional tuning variables from the
//! environment or a `.env` file. Detailed progress goes to `LOG_DIR`; the
//! console only shows warnings and errors.

use tickerstats::{init_logging, pipeline, EtlConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = EtlConfig::from_env()?;

    init_logging(&config.log_dir)?;
    tracing::info!(
        database = %config.database_path.display(),
        base_url = %config.api.base_url,
        fetch_workers = config.workers.fetch_workers,
        calculate_workers = config.workers.calculate_workers,
        "Configuration loaded"
    );

    match pipeline::run(&config).await {
        Ok(summary) => {
            if !summary.is_completed() {
                tracing::warn!("Run ended early: {}", summary.outcome);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!("ETL run failed: {}", e);
            Err(e.into())
        }
    }
}
