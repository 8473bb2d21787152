//! Provisional-exchange resolution against the processor's record

use std::sync::Arc;

use patron_types::{Cents, ExchangeStatus};
use payday::models::Exchange;
use payday::processor::TransactionOutcome;
use payday::services::reconcile::sync_with_processor;

use super::mock_infrastructure::*;

#[tokio::test]
async fn test_crashed_capture_that_landed_is_marked_succeeded_once() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice").insert(&mut conn);

    // A capture's provisional row, written just before the process died.
    // The processor's side says the capture landed.
    let exchange =
        Exchange::record_pre(&mut conn, "alice", Cents(1000), Cents(400), Some("card")).unwrap();
    assert_eq!(balance_of(&mut conn, "alice"), Cents::ZERO);

    let processor = Arc::new(MockProcessor::new());
    processor.inject_transaction(&exchange.id, TransactionOutcome::Succeeded, None);

    let touched = sync_with_processor(&pool, processor.clone(), 0).await.unwrap();
    assert_eq!(touched, 1);

    let resolved = Exchange::find_by_id(&mut conn, &exchange.id).unwrap().unwrap();
    assert_eq!(resolved.status, "succeeded");
    assert_eq!(balance_of(&mut conn, "alice"), Cents(600));

    // A second pass changes nothing: the credit applied exactly once.
    let touched = sync_with_processor(&pool, processor, 0).await.unwrap();
    assert_eq!(touched, 0);
    assert_eq!(balance_of(&mut conn, "alice"), Cents(600));
    assert_conservation(&mut conn, 0);
}

#[tokio::test]
async fn test_crashed_payout_that_never_sent_is_deleted_and_restored() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice").balance(5000).insert(&mut conn);

    let exchange =
        Exchange::record_pre(&mut conn, "alice", Cents(-2000), Cents::ZERO, Some("bank")).unwrap();
    assert_eq!(balance_of(&mut conn, "alice"), Cents(3000));

    // The processor has no record at all: the call never went out.
    let processor = Arc::new(MockProcessor::new());
    let touched = sync_with_processor(&pool, processor, 0).await.unwrap();
    assert_eq!(touched, 1);

    assert!(Exchange::find_by_id(&mut conn, &exchange.id).unwrap().is_none());
    assert_eq!(balance_of(&mut conn, "alice"), Cents(5000));
    assert_conservation(&mut conn, 5000);
}

#[tokio::test]
async fn test_crashed_payout_that_failed_is_marked_and_restored() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice").balance(5000).insert(&mut conn);

    let exchange =
        Exchange::record_pre(&mut conn, "alice", Cents(-2000), Cents::ZERO, Some("bank")).unwrap();

    let processor = Arc::new(MockProcessor::new());
    processor.inject_transaction(
        &exchange.id,
        TransactionOutcome::Failed,
        Some("bank account closed"),
    );

    sync_with_processor(&pool, processor, 0).await.unwrap();

    let resolved = Exchange::find_by_id(&mut conn, &exchange.id).unwrap().unwrap();
    assert_eq!(resolved.status, "failed");
    assert_eq!(resolved.error.as_deref(), Some("bank account closed"));
    assert_eq!(balance_of(&mut conn, "alice"), Cents(5000));
}

#[tokio::test]
async fn test_recent_provisional_rows_wait_out_the_grace_period() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice").balance(5000).insert(&mut conn);

    let exchange =
        Exchange::record_pre(&mut conn, "alice", Cents(-2000), Cents::ZERO, Some("bank")).unwrap();

    // No processor record, but the row is seconds old: an in-flight call
    // could still land, so nothing is deleted yet.
    let processor = Arc::new(MockProcessor::new());
    let touched = sync_with_processor(&pool, processor, 3600).await.unwrap();
    assert_eq!(touched, 0);

    let untouched = Exchange::find_by_id(&mut conn, &exchange.id).unwrap().unwrap();
    assert_eq!(untouched.status, "pre");
    assert_eq!(balance_of(&mut conn, "alice"), Cents(3000));
}

#[tokio::test]
async fn test_resolution_is_idempotent_at_the_model_level() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice").balance(5000).insert(&mut conn);

    let exchange =
        Exchange::record_pre(&mut conn, "alice", Cents(-2000), Cents::ZERO, Some("bank")).unwrap();

    // Failure restores the debit; repeating the resolution must not
    // restore it twice.
    Exchange::record_result(&mut conn, &exchange.id, ExchangeStatus::Failed, Some("closed"))
        .unwrap();
    assert_eq!(balance_of(&mut conn, "alice"), Cents(5000));
    Exchange::record_result(&mut conn, &exchange.id, ExchangeStatus::Failed, Some("closed"))
        .unwrap();
    assert_eq!(balance_of(&mut conn, "alice"), Cents(5000));

    // A final row cannot be deleted.
    assert!(Exchange::delete_and_restore(&mut conn, &exchange.id).is_err());
}
