//! Balance commit
//!
//! The single transaction that turns a run's working balances into stored
//! balances and its pending transfers into ledger rows. Before the
//! transaction commits, every touched participant's stored balance is
//! checked against what this run accounts for; any shortfall means
//! something outside the engine moved money mid-run, and the whole
//! transaction — and the run — aborts for inspection.

use anyhow::{bail, Context, Result};
use diesel::prelude::*;
use patron_types::Cents;
use tracing::info;

use crate::models::{NewTransfer, Participant, PaydayRun, Transfer};
use crate::schema::participants;
use crate::services::snapshot::WorkingSet;

/// Apply the run's balance deltas and append its transfers atomically.
pub fn commit_balances(conn: &mut SqliteConnection, run: &PaydayRun, ws: &WorkingSet) -> Result<()> {
    // What this run's card captures already added to stored balances.
    // The committer only tolerates balances the run itself explains.
    let captured = crate::models::Exchange::inbound_nominal_since(conn, run.ts_start)?;

    conn.transaction(|conn| {
        let now = chrono::Utc::now().naive_utc();

        for participant_id in ws.order() {
            let Some(wp) = ws.participant(participant_id) else {
                continue;
            };
            let delta = wp.new_balance - wp.old_balance;
            if !delta.is_zero() {
                // The store's non-negative constraint is the final word;
                // a violation here rolls the whole commit back.
                diesel::update(participants::table.find(participant_id))
                    .set(
                        participants::balance_cents
                            .eq(participants::balance_cents + delta.cents()),
                    )
                    .execute(conn)
                    .with_context(|| {
                        format!("Failed to apply balance delta for {}", participant_id)
                    })?;
            }
        }

        let batch: Vec<NewTransfer> = ws
            .pending_transfers
            .iter()
            .map(|t| NewTransfer {
                tipper: t.tipper.clone(),
                tippee: t.tippee.clone(),
                amount_cents: t.amount.cents(),
                context: t.context.as_str().to_string(),
                timestamp: now,
            })
            .collect();
        if !batch.is_empty() {
            Transfer::record_batch(conn, &batch)?;
        }

        // Defense against concurrent external mutation: the stored
        // balance may exceed what we account for (an outside top-up) but
        // must never fall short of it.
        for participant_id in ws.order() {
            let Some(wp) = ws.participant(participant_id) else {
                continue;
            };
            let stored = Participant::find_by_id(conn, participant_id)?
                .with_context(|| format!("Participant {} vanished mid-run", participant_id))?
                .balance();
            let accounted = wp.new_balance
                + Cents(captured.get(participant_id).copied().unwrap_or(0));
            if stored < accounted {
                bail!(
                    "Balance for {} is {} but this run accounts for {}; aborting commit",
                    participant_id,
                    stored,
                    accounted
                );
            }
        }

        PaydayRun::set_participants(conn, run.id, ws.len() as i64)?;

        info!(
            participants = ws.len(),
            transfers = ws.pending_transfers.len(),
            "Balances committed"
        );
        Ok(())
    })
}
