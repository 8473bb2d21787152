//! Card hold coordination
//!
//! Two phases bracket the transfer propagation:
//!
//! - [`create_holds`]: before transfers, pre-authorize every participant
//!   whose pledges exceed their settled balance. Holds left behind by an
//!   interrupted run are found by their run marker and reused when they
//!   still cover the shortfall, voided otherwise.
//! - [`settle_holds`]: after transfers, capture exactly what each
//!   participant ended up owing and void everything else.
//!
//! All processor calls are independent network requests and run
//! concurrently under a bounded worker pool. A failure to create one
//! participant's hold is that participant's problem alone; a failure to
//! capture is fatal for the run, because the funded transfers are already
//! interwoven with other participants' balances.

use anyhow::{bail, Context, Result};
use patron_types::{Cents, ExchangeStatus};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::fee;
use crate::db::DbPool;
use crate::models::{Exchange, Participant, PaydayRun};
use crate::processor::{Hold, Processor, ProcessorError};
use crate::services::snapshot::WorkingSet;

/// Marker carried in hold metadata so an interrupted run can find its own
/// pre-authorizations.
pub fn run_marker(run_id: i32) -> String {
    format!("payday-{}", run_id)
}

struct HoldPlan {
    participant_id: String,
    card_ref: String,
    /// Upcharged total to authorize.
    total: Cents,
    /// Hold from an interrupted run that no longer covers the shortfall.
    stale: Option<Hold>,
}

enum HoldOutcome {
    Created {
        participant_id: String,
        result: Result<Hold, ProcessorError>,
    },
    Voided {
        participant_id: String,
        result: Result<(), ProcessorError>,
    },
}

/// Create (or adopt) a card hold for every participant who needs one.
/// Returns the holds by participant id; `hold_ok` is flipped on for every
/// participant whose hold stands.
pub async fn create_holds(
    pool: &DbPool,
    processor: Arc<dyn Processor>,
    run_id: i32,
    ws: &mut WorkingSet,
    concurrency: usize,
) -> Result<HashMap<String, Hold>> {
    let marker = run_marker(run_id);

    // If we cannot see the holds an earlier attempt may have created, we
    // cannot safely create more.
    let mut existing: HashMap<String, Hold> = processor
        .find_holds(&marker)
        .await
        .context("Failed to list existing card holds")?
        .into_iter()
        .map(|h| (h.participant_id.clone(), h))
        .collect();

    let mut conn = pool.get().context("Failed to get DB connection")?;
    let mut holds: HashMap<String, Hold> = HashMap::new();
    let mut plans: Vec<HoldPlan> = Vec::new();

    for participant_id in ws.order().to_vec() {
        let Some(wp) = ws.participant(&participant_id) else {
            continue;
        };
        let shortfall = wp.shortfall();
        if !shortfall.is_positive() {
            continue;
        }
        let Some(card_ref) = wp.card_ref.clone() else {
            // The shortfall is recorded against the participant; the
            // batch moves on.
            warn!(participant_id = %participant_id, %shortfall, "Shortfall with no card on file");
            Participant::mark_charge_failed(&mut conn, &participant_id, "no card on file")?;
            PaydayRun::add_charge_failure(&mut conn, run_id)?;
            continue;
        };

        let (total, _fee) = fee::upcharge(shortfall);

        match existing.remove(&participant_id) {
            Some(hold) if hold.amount >= total => {
                info!(participant_id = %participant_id, hold_id = %hold.id, "Reusing hold from interrupted run");
                Participant::mark_charge_success(&mut conn, &participant_id)?;
                if let Some(wp) = ws.participant_mut(&participant_id) {
                    wp.hold_ok = true;
                }
                holds.insert(participant_id, hold);
            }
            stale => plans.push(HoldPlan {
                participant_id,
                card_ref,
                total,
                stale,
            }),
        }
    }

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks: JoinSet<HoldOutcome> = JoinSet::new();

    for plan in plans {
        let processor = Arc::clone(&processor);
        let semaphore = Arc::clone(&semaphore);
        let marker = marker.clone();
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            if let Some(stale) = &plan.stale {
                // A second authorization on top of a live stale one would
                // double the pressure on the participant's card.
                if let Err(e) = processor.void_hold(stale).await {
                    return HoldOutcome::Created {
                        participant_id: plan.participant_id,
                        result: Err(e),
                    };
                }
            }
            let result = processor
                .create_hold(&plan.card_ref, &plan.participant_id, plan.total, &marker)
                .await;
            HoldOutcome::Created {
                participant_id: plan.participant_id,
                result,
            }
        });
    }

    // Holds from an interrupted run whose participants no longer need one.
    for (_, hold) in existing {
        let processor = Arc::clone(&processor);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let participant_id = hold.participant_id.clone();
            let result = processor.void_hold(&hold).await;
            HoldOutcome::Voided {
                participant_id,
                result,
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined.context("Hold worker panicked")? {
            HoldOutcome::Created {
                participant_id,
                result: Ok(hold),
            } => {
                Participant::mark_charge_success(&mut conn, &participant_id)?;
                if let Some(wp) = ws.participant_mut(&participant_id) {
                    wp.hold_ok = true;
                }
                holds.insert(participant_id, hold);
            }
            HoldOutcome::Created {
                participant_id,
                result: Err(e),
            } => {
                warn!(participant_id = %participant_id, error = %e, "Card hold failed");
                Participant::mark_charge_failed(&mut conn, &participant_id, &e.to_string())?;
                PaydayRun::add_charge_failure(&mut conn, run_id)?;
            }
            HoldOutcome::Voided {
                participant_id,
                result,
            } => {
                if let Err(e) = result {
                    // The hold expires on its own; nothing was captured.
                    warn!(participant_id = %participant_id, error = %e, "Failed to void leftover hold");
                }
            }
        }
    }

    info!(holds = holds.len(), "Card holds in place");
    Ok(holds)
}

struct CapturePlan {
    participant_id: String,
    hold: Hold,
    total: Cents,
    exchange_id: String,
}

/// Capture what each negative working balance owes and void every other
/// hold. Transfer propagation must be complete before this runs.
pub async fn settle_holds(
    pool: &DbPool,
    processor: Arc<dyn Processor>,
    run_id: i32,
    ws: &WorkingSet,
    holds: &HashMap<String, Hold>,
    concurrency: usize,
) -> Result<()> {
    let mut conn = pool.get().context("Failed to get DB connection")?;
    let mut plans: Vec<CapturePlan> = Vec::new();

    for participant_id in ws.order() {
        let Some(wp) = ws.participant(participant_id) else {
            continue;
        };
        if !wp.new_balance.is_negative() {
            continue;
        }
        let hold = holds.get(participant_id).with_context(|| {
            format!(
                "Participant {} owes {} with no hold to capture",
                participant_id, -wp.new_balance
            )
        })?;

        let nominal = -wp.new_balance;
        let (total, fee) = fee::upcharge(nominal);
        // The provisional row goes in before the network call; the
        // exchange id doubles as the processor-side reference.
        let exchange = Exchange::record_pre(&mut conn, participant_id, total, fee, Some("card"))?;
        plans.push(CapturePlan {
            participant_id: participant_id.clone(),
            hold: hold.clone(),
            total,
            exchange_id: exchange.id,
        });
    }

    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks: JoinSet<(CapturePlan, Result<(), ProcessorError>)> = JoinSet::new();

    for plan in plans {
        let processor = Arc::clone(&processor);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let result = processor
                .capture_hold(&plan.hold, plan.total, &plan.exchange_id)
                .await;
            (plan, result)
        });
    }

    let mut captured: HashSet<String> = HashSet::new();
    let mut capture_failures: Vec<String> = Vec::new();

    while let Some(joined) = tasks.join_next().await {
        let (plan, result) = joined.context("Capture worker panicked")?;
        match result {
            Ok(()) => {
                Exchange::record_result(
                    &mut conn,
                    &plan.exchange_id,
                    ExchangeStatus::Succeeded,
                    None,
                )?;
                Participant::mark_charge_success(&mut conn, &plan.participant_id)?;
                captured.insert(plan.participant_id);
            }
            Err(e) if e.is_transient() => {
                // Outcome unknown: the exchange stays `pre` for
                // reconciliation to resolve on the next invocation.
                warn!(participant_id = %plan.participant_id, error = %e, "Capture outcome unknown");
                PaydayRun::add_charge_failure(&mut conn, run_id)?;
                capture_failures.push(plan.participant_id);
            }
            Err(e) => {
                Exchange::record_result(
                    &mut conn,
                    &plan.exchange_id,
                    ExchangeStatus::Failed,
                    Some(&e.to_string()),
                )?;
                Participant::mark_charge_failed(&mut conn, &plan.participant_id, &e.to_string())?;
                PaydayRun::add_charge_failure(&mut conn, run_id)?;
                capture_failures.push(plan.participant_id);
            }
        }
    }

    // Anything not captured gets released; a capture already released its
    // own remainder.
    let mut voids: JoinSet<(String, Result<(), ProcessorError>)> = JoinSet::new();
    for (participant_id, hold) in holds {
        if captured.contains(participant_id) {
            continue;
        }
        let processor = Arc::clone(&processor);
        let semaphore = Arc::clone(&semaphore);
        let participant_id = participant_id.clone();
        let hold = hold.clone();
        voids.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let result = processor.void_hold(&hold).await;
            (participant_id, result)
        });
    }
    while let Some(joined) = voids.join_next().await {
        let (participant_id, result) = joined.context("Void worker panicked")?;
        if let Err(e) = result {
            warn!(participant_id = %participant_id, error = %e, "Failed to void unused hold");
        }
    }

    if !capture_failures.is_empty() {
        // An authorized hold that will not capture means participants
        // already received funds this run cannot collect. The run halts
        // at payin for inspection; recorded exchanges and the stage
        // counter make the next invocation pick up from the truth.
        bail!(
            "Hold capture failed for {} participant(s): {}",
            capture_failures.len(),
            capture_failures.join(", ")
        );
    }

    info!(captures = captured.len(), "Holds settled");
    Ok(())
}
