//! Crash/restart behavior: open-run adoption, stage gating, idempotent
//! payin

use std::sync::Arc;

use chrono::Utc;
use patron_types::Cents;
use payday::models::payday_run::{STAGE_PAYIN, STAGE_STATS};
use payday::models::{NewTransfer, PaydayRun, Tip, Transfer};
use payday::processor::Processor;
use payday::services::Payday;

use super::mock_infrastructure::*;

#[tokio::test]
async fn test_second_start_adopts_the_open_run() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();

    let first = PaydayRun::start(&mut conn).unwrap();
    let second = PaydayRun::start(&mut conn).unwrap();
    assert_eq!(first.id, second.id);
    assert!(second.ts_end.is_none());

    // Once closed, the next start opens a fresh cycle.
    let mut open = second;
    open.close(&mut conn).unwrap();
    let third = PaydayRun::start(&mut conn).unwrap();
    assert_ne!(first.id, third.id);
}

#[tokio::test]
async fn test_transfers_recorded_before_a_crash_are_not_reapplied() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice").insert(&mut conn);
    SeedParticipant::new("bob").balance(600).insert(&mut conn);
    Tip::set(&mut conn, "alice", "bob", Cents(600)).unwrap();

    // Simulate a run that committed payin and died before bumping the
    // stage: the open row exists and the transfer is already recorded
    // (balances already moved: alice gave her $6.00 to bob).
    let run = PaydayRun::start(&mut conn).unwrap();
    assert!(run.ts_start <= Utc::now().naive_utc());
    Transfer::record_batch(
        &mut conn,
        &[NewTransfer {
            tipper: "alice".to_string(),
            tippee: "bob".to_string(),
            amount_cents: 600,
            context: "tip".to_string(),
            timestamp: Utc::now().naive_utc(),
        }],
    )
    .unwrap();

    let processor = Arc::new(MockProcessor::new());
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    let summary = payday.run().await.unwrap();

    // Same run resumed; the settled pair is excluded from the snapshot,
    // so nothing moves twice and no hold is sized for it.
    assert_eq!(summary.payday_id, run.id);
    assert_eq!(Transfer::all(&mut conn).unwrap().len(), 1);
    assert_eq!(balance_of(&mut conn, "alice"), Cents::ZERO);
    assert_eq!(balance_of(&mut conn, "bob"), Cents(600));
    assert_eq!(processor.holds_created(), 0);
}

#[tokio::test]
async fn test_completed_payin_stage_is_never_rerun() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice").balance(1000).insert(&mut conn);
    SeedParticipant::new("bob").insert(&mut conn);
    Tip::set(&mut conn, "alice", "bob", Cents(600)).unwrap();

    // A run that already finished payin (and died before payout).
    let mut run = PaydayRun::start(&mut conn).unwrap();
    run.set_stage(&mut conn, STAGE_PAYIN).unwrap();

    let processor = Arc::new(MockProcessor::new());
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    let summary = payday.run().await.unwrap();

    // Payin is skipped wholesale — the tip stays unsettled this cycle —
    // but payout and stats run and the cycle closes.
    assert_eq!(summary.payday_id, run.id);
    assert!(Transfer::all(&mut conn).unwrap().is_empty());
    assert_eq!(balance_of(&mut conn, "alice"), Cents(1000));
    let closed = PaydayRun::find_by_id(&mut conn, run.id).unwrap().unwrap();
    assert_eq!(closed.stage, STAGE_STATS);
    assert!(closed.ts_end.is_some());
}

#[tokio::test]
async fn test_interrupted_capture_recovers_without_double_charging() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice").with_card().insert(&mut conn);
    SeedParticipant::new("bob").insert(&mut conn);
    Tip::set(&mut conn, "alice", "bob", Cents(600)).unwrap();

    let processor = Arc::new(MockProcessor::new());
    processor.fail_captures_for("alice");

    // First attempt: the hold goes up, transfers propagate, but the
    // capture outcome is unknown. That is fatal for payin — the run
    // stays at stage 0 with a provisional exchange on the books.
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    let err = payday.run().await.unwrap_err();
    assert!(format!("{:#}", err).contains("capture failed"));

    let open = PaydayRun::open(&mut conn).unwrap().unwrap();
    assert_eq!(open.stage, 0);
    assert!(Transfer::all(&mut conn).unwrap().is_empty());
    assert_eq!(all_exchanges(&mut conn).len(), 1);
    assert_eq!(all_exchanges(&mut conn)[0].status, "pre");
    assert_eq!(balance_of(&mut conn, "bob"), Cents::ZERO);
    // The uncaptured hold was released before the run halted.
    assert_eq!(processor.voided_holds(), 1);

    // Second invocation with the processor healthy: reconciliation finds
    // no record of the capture (it never went out), deletes the
    // provisional row, and payin redoes the same snapshot work.
    processor.heal();
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    let summary = payday.run().await.unwrap();

    assert_eq!(summary.payday_id, open.id);
    assert_eq!(balance_of(&mut conn, "alice"), Cents::ZERO);
    assert_eq!(balance_of(&mut conn, "bob"), Cents(600));
    assert_eq!(Transfer::all(&mut conn).unwrap().len(), 1);

    // Exactly one capture ever landed on the card.
    assert_eq!(processor.captured_total(), 1000);
    let exchanges = all_exchanges(&mut conn);
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].status, "succeeded");
    assert_conservation(&mut conn, 0);
}

#[tokio::test]
async fn test_leftover_hold_from_interrupted_run_is_reused() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice").with_card().insert(&mut conn);
    SeedParticipant::new("bob").insert(&mut conn);
    Tip::set(&mut conn, "alice", "bob", Cents(600)).unwrap();

    // An earlier attempt at this same run authorized the card and died
    // before transfers. The hold is still live under the run's marker.
    let run = PaydayRun::start(&mut conn).unwrap();
    let processor = Arc::new(MockProcessor::new());
    let marker = format!("payday-{}", run.id);
    processor
        .create_hold("card-alice", "alice", Cents(1000), &marker)
        .await
        .unwrap();
    assert_eq!(processor.holds_created(), 1);

    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    payday.run().await.unwrap();

    // No second authorization hit the card; the old hold was captured
    // and nothing is left authorized.
    assert_eq!(processor.holds_created(), 1);
    assert_eq!(processor.captured_total(), 1000);
    assert!(processor.live_holds().is_empty());
    assert_eq!(balance_of(&mut conn, "bob"), Cents(600));
}
