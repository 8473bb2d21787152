//! Settlement batch entry point
//!
//! Invoked on a schedule (external cron). Exit code 0 means the run
//! completed; non-zero means a fatal error stopped it at its last
//! completed stage, where the next invocation will pick it up.
//! Per-participant declines and timeouts are counted on the run, not
//! reflected in the exit code.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::error;

use payday::config::PaydayConfig;
use payday::db::create_pool;
use payday::processor::RestProcessor;
use payday::services::Payday;
use payday::telemetry::init_telemetry;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_telemetry();

    if let Err(e) = run().await {
        error!("Settlement run failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = PaydayConfig::from_env()?;
    let pool = create_pool(&config.database_url)?;
    let processor =
        Arc::new(RestProcessor::new(&config).context("Failed to build processor client")?);

    let payday = Payday::start(pool, processor, config)?;
    payday.run().await?;
    Ok(())
}
