//! Telemetry for the settlement engine
//!
//! Structured logging via tracing-subscriber. The engine is a short-lived
//! batch process, so there is no exporter fan-out: everything goes to
//! stderr and the ledger itself is the audit trail.
//!
//! Environment variables:
//! - RUST_LOG: tracing filter (default: "info,diesel=warn")

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging.
///
/// Call once at process start, before any settlement work.
pub fn init_telemetry() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,diesel=warn".into());

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
