//! Settlement engine configuration
//!
//! Everything is env-driven with sane defaults so the batch entry point,
//! the migration runner, and tests all construct config the same way.

pub mod fee;

use anyhow::Result;
use std::env;
use std::time::Duration;

/// Default width of the worker pool for processor calls (holds, captures,
/// credits). Each call is an independent network request.
pub const DEFAULT_PROCESSOR_CONCURRENCY: usize = 5;

/// Default request timeout for processor calls, in seconds.
pub const DEFAULT_PROCESSOR_TIMEOUT_SECS: u64 = 30;

/// Default grace period before a `pre` exchange with no matching processor
/// record is considered never-sent, in seconds.
pub const DEFAULT_RECONCILE_GRACE_SECS: i64 = 3600;

/// Configuration for one settlement run.
#[derive(Debug, Clone)]
pub struct PaydayConfig {
    pub database_url: String,
    pub processor_base_url: String,
    pub processor_api_key: String,
    pub processor_concurrency: usize,
    pub processor_timeout: Duration,
    pub reconcile_grace_secs: i64,
}

impl PaydayConfig {
    /// Load configuration from the environment.
    ///
    /// Environment variables:
    /// - `DATABASE_URL`: path to the ledger database (default: "patron.db")
    /// - `PROCESSOR_BASE_URL`: card/bank processor API endpoint
    /// - `PROCESSOR_API_KEY`: processor API credential
    /// - `PROCESSOR_CONCURRENCY`: worker pool width (default: 5)
    /// - `PROCESSOR_TIMEOUT_SECS`: per-call timeout (default: 30)
    /// - `RECONCILE_GRACE_SECS`: never-sent grace period (default: 3600)
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "patron.db".to_string());

        let processor_base_url = env::var("PROCESSOR_BASE_URL")
            .unwrap_or_else(|_| "https://api.processor.test".to_string());

        let processor_api_key = env::var("PROCESSOR_API_KEY").unwrap_or_default();

        let processor_concurrency = env::var("PROCESSOR_CONCURRENCY")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(DEFAULT_PROCESSOR_CONCURRENCY);

        let processor_timeout = Duration::from_secs(
            env::var("PROCESSOR_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PROCESSOR_TIMEOUT_SECS),
        );

        let reconcile_grace_secs = env::var("RECONCILE_GRACE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECONCILE_GRACE_SECS);

        Ok(Self {
            database_url,
            processor_base_url,
            processor_api_key,
            processor_concurrency,
            processor_timeout,
            reconcile_grace_secs,
        })
    }
}
