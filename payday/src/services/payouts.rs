//! Payouts
//!
//! Credits participants who ended the cycle with money they are not about
//! to give away. Each payout follows the provisional-exchange protocol:
//! debit first, call the processor second, resolve third — so a crash at
//! any point leaves a `pre` row reconciliation can settle against the
//! processor's record.
//!
//! External money movement requires an explicit whitelist decision; an
//! unreviewed participant keeps accruing balance until someone looks.

use anyhow::{Context, Result};
use patron_types::{Cents, ExchangeStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::fee;
use crate::config::PaydayConfig;
use crate::db::DbPool;
use crate::models::{Exchange, Participant, PaydayRun, Tip};
use crate::processor::{Processor, ProcessorError, TransactionOutcome};

struct PayoutPlan {
    participant_id: String,
    bank_ref: String,
    payable: Cents,
    exchange_id: String,
}

/// Issue bank credits for every participant due one.
pub async fn run_payouts(
    pool: &DbPool,
    processor: Arc<dyn Processor>,
    run_id: i32,
    config: &PaydayConfig,
) -> Result<()> {
    let mut conn = pool.get().context("Failed to get DB connection")?;

    let candidates = Participant::eligible_for_settlement(&mut conn)?;
    let in_flight = Exchange::participants_with_pending_outbound(&mut conn)?;

    // What each participant is on the hook to give next cycle; paying
    // that out now would just force a card charge later.
    let now = chrono::Utc::now().naive_utc();
    let mut obligations: HashMap<String, Cents> = HashMap::new();
    for tip in Tip::current_as_of(&mut conn, now)? {
        *obligations.entry(tip.tipper.clone()).or_insert(Cents::ZERO) += tip.amount();
    }

    let minimum = fee::minimum_credit();
    let mut plans: Vec<PayoutPlan> = Vec::new();

    for p in candidates {
        if !p.balance().is_positive() {
            continue;
        }
        if !p.is_whitelisted() {
            continue;
        }
        let Some(bank_ref) = p.bank_ref.clone() else {
            continue;
        };
        if in_flight.contains(&p.id) {
            warn!(participant_id = %p.id, "Payout already in flight, skipping");
            continue;
        }

        let obligated = obligations.get(&p.id).copied().unwrap_or(Cents::ZERO);
        let payable = p.balance() - obligated;
        if payable < minimum {
            info!(
                participant_id = %p.id,
                %payable,
                %minimum,
                "Payable below minimum credit, held over"
            );
            continue;
        }

        // Provisional debit before the call; fee is zero on credits
        // under the current processor contract.
        let exchange = Exchange::record_pre(
            &mut conn,
            &p.id,
            -payable,
            Cents(fee::CREDIT_FEE_CENTS),
            Some("bank"),
        )?;
        plans.push(PayoutPlan {
            participant_id: p.id,
            bank_ref,
            payable,
            exchange_id: exchange.id,
        });
    }

    let semaphore = Arc::new(Semaphore::new(config.processor_concurrency));
    let mut tasks: JoinSet<(PayoutPlan, Result<TransactionOutcome, ProcessorError>)> =
        JoinSet::new();

    for plan in plans {
        let processor = Arc::clone(&processor);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let result = processor
                .credit(
                    &plan.bank_ref,
                    &plan.participant_id,
                    plan.payable,
                    &plan.exchange_id,
                )
                .await;
            (plan, result)
        });
    }

    let mut issued = 0usize;
    while let Some(joined) = tasks.join_next().await {
        let (plan, result) = joined.context("Payout worker panicked")?;
        match result {
            Ok(TransactionOutcome::Succeeded) => {
                Exchange::record_result(
                    &mut conn,
                    &plan.exchange_id,
                    ExchangeStatus::Succeeded,
                    None,
                )?;
                issued += 1;
            }
            Ok(TransactionOutcome::Pending) => {
                Exchange::record_result(
                    &mut conn,
                    &plan.exchange_id,
                    ExchangeStatus::Pending,
                    None,
                )?;
                issued += 1;
            }
            Ok(TransactionOutcome::Failed) => {
                Exchange::record_result(
                    &mut conn,
                    &plan.exchange_id,
                    ExchangeStatus::Failed,
                    Some("processor reported failure"),
                )?;
                PaydayRun::add_credit_failure(&mut conn, run_id)?;
                warn!(participant_id = %plan.participant_id, "Bank credit failed");
            }
            Err(e) if e.is_transient() => {
                // Outcome unknown: keep the debit and the `pre` row;
                // reconciliation decides later. Guessing failure here
                // could pay the participant twice.
                warn!(participant_id = %plan.participant_id, error = %e, "Credit outcome unknown");
                PaydayRun::add_credit_failure(&mut conn, run_id)?;
            }
            Err(e) => {
                Exchange::record_result(
                    &mut conn,
                    &plan.exchange_id,
                    ExchangeStatus::Failed,
                    Some(&e.to_string()),
                )?;
                PaydayRun::add_credit_failure(&mut conn, run_id)?;
                warn!(participant_id = %plan.participant_id, error = %e, "Bank credit declined");
            }
        }
    }

    info!(issued, "Payouts complete");
    Ok(())
}
