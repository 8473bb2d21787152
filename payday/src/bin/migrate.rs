//! Standalone migration runner for the settlement ledger

use anyhow::{Context, Result};
use diesel_migrations::MigrationHarness;

use payday::config::PaydayConfig;
use payday::db::{create_pool, MIGRATIONS};
use payday::telemetry::init_telemetry;

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_telemetry();

    let config = PaydayConfig::from_env()?;
    let pool = create_pool(&config.database_url)?;
    let mut conn = pool.get().context("Failed to get database connection")?;

    let pending = conn
        .pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to list pending migrations: {e}"))?;

    if pending.is_empty() {
        tracing::info!("All migrations are already applied");
        return Ok(());
    }

    for m in &pending {
        tracing::info!(migration = %m.name(), "Pending");
    }

    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {e}"))?;

    tracing::info!("Migrations applied; ledger is ready");
    Ok(())
}
