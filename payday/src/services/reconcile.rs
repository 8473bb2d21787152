//! Reconciliation against the processor's record
//!
//! Runs first in every settlement invocation. Any exchange still `pre`
//! means a previous process died between writing the provisional row and
//! learning the call's outcome; any exchange `pending` means the
//! processor had not cleared it yet. Both are resolved here from the
//! processor's authoritative record, found by the reference we tagged
//! every call with.
//!
//! A `pre` row with no processor record at all means the call never went
//! out: past the grace period the row is deleted and any provisional
//! debit restored. Success is never assumed.

use anyhow::{Context, Result};
use patron_types::ExchangeStatus;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::DbPool;
use crate::models::Exchange;
use crate::processor::{Processor, TransactionOutcome};

/// Resolve unresolved exchanges. Returns how many were touched.
pub async fn sync_with_processor(
    pool: &DbPool,
    processor: Arc<dyn Processor>,
    grace_secs: i64,
) -> Result<usize> {
    let mut conn = pool.get().context("Failed to get DB connection")?;
    let unresolved = Exchange::unresolved(&mut conn)?;
    if unresolved.is_empty() {
        return Ok(0);
    }

    info!(count = unresolved.len(), "Reconciling unresolved exchanges");
    let now = chrono::Utc::now().naive_utc();
    let mut touched = 0;

    for exchange in unresolved {
        let status = exchange.status()?;
        // Settling with stale knowledge of money movement is how double
        // payments happen, so a lookup failure here is fatal.
        let found = processor
            .find_transaction(&exchange.id)
            .await
            .with_context(|| format!("Failed to look up exchange {}", exchange.id))?;

        match found {
            Some(tx) => {
                let outcome = match tx.outcome {
                    TransactionOutcome::Succeeded => ExchangeStatus::Succeeded,
                    TransactionOutcome::Failed => ExchangeStatus::Failed,
                    TransactionOutcome::Pending => ExchangeStatus::Pending,
                };
                if outcome == status {
                    continue;
                }
                info!(
                    exchange_id = %exchange.id,
                    participant_id = %exchange.participant_id,
                    from = %status,
                    to = %outcome,
                    "Exchange resolved from processor record"
                );
                Exchange::record_result(&mut conn, &exchange.id, outcome, tx.error.as_deref())?;
                touched += 1;
            }
            None if status == ExchangeStatus::Pre => {
                let age_secs = (now - exchange.created_at).num_seconds();
                if age_secs < grace_secs {
                    // An in-flight call could still land; leave the row
                    // for the next pass.
                    warn!(
                        exchange_id = %exchange.id,
                        age_secs,
                        "Provisional exchange within grace period, leaving untouched"
                    );
                    continue;
                }
                warn!(
                    exchange_id = %exchange.id,
                    participant_id = %exchange.participant_id,
                    amount = %exchange.amount(),
                    "Call never reached the processor; deleting provisional exchange"
                );
                Exchange::delete_and_restore(&mut conn, &exchange.id)?;
                touched += 1;
            }
            None => {
                // A pending row was acknowledged by the processor once;
                // its record should exist. Keep the row and complain.
                warn!(
                    exchange_id = %exchange.id,
                    "Pending exchange missing from processor record"
                );
            }
        }
    }

    Ok(touched)
}
