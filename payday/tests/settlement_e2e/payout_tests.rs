//! Payout scenarios: obligations netting, minimums, declines, unknown
//! outcomes

use std::sync::Arc;

use patron_types::Cents;
use payday::models::{Exchange, Tip};
use payday::services::Payday;

use super::mock_infrastructure::*;

#[tokio::test]
async fn test_payout_nets_out_next_cycle_obligations() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice")
        .balance(5000)
        .whitelisted()
        .with_bank()
        .insert(&mut conn);
    SeedParticipant::new("bob").insert(&mut conn);
    Tip::set(&mut conn, "alice", "bob", Cents(600)).unwrap();

    let processor = Arc::new(MockProcessor::new());
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    let summary = payday.run().await.unwrap();

    // Payin moves $6.00 to bob; the payout then withholds the standing
    // $6.00 pledge so next cycle settles from balance, not a card.
    assert_eq!(balance_of(&mut conn, "bob"), Cents(600));
    assert_eq!(balance_of(&mut conn, "alice"), Cents(600));
    assert_eq!(processor.credited_total(), 3800);
    assert_eq!(summary.n_credits, 1);
    assert_eq!(summary.credit_volume, Cents(3800));

    let outbound: Vec<_> = all_exchanges(&mut conn)
        .into_iter()
        .filter(|x| x.amount_cents < 0)
        .collect();
    assert_eq!(outbound.len(), 1);
    assert_eq!(outbound[0].amount_cents, -3800);
    assert_eq!(outbound[0].status, "succeeded");
    assert_eq!(outbound[0].fee_cents, 0);

    assert_conservation(&mut conn, 5000);
}

#[tokio::test]
async fn test_payout_below_minimum_is_held_over() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice")
        .balance(900)
        .whitelisted()
        .with_bank()
        .insert(&mut conn);

    let processor = Arc::new(MockProcessor::new());
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    let summary = payday.run().await.unwrap();

    assert_eq!(balance_of(&mut conn, "alice"), Cents(900));
    assert_eq!(processor.credited_total(), 0);
    assert_eq!(summary.n_credits, 0);
    assert!(all_exchanges(&mut conn).is_empty());
}

#[tokio::test]
async fn test_unreviewed_participant_gets_no_payout() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    // Bank on file and plenty of balance, but nobody has whitelisted them.
    SeedParticipant::new("alice").balance(5000).with_bank().insert(&mut conn);

    let processor = Arc::new(MockProcessor::new());
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    payday.run().await.unwrap();

    assert_eq!(balance_of(&mut conn, "alice"), Cents(5000));
    assert_eq!(processor.credited_total(), 0);
}

#[tokio::test]
async fn test_declined_credit_restores_the_balance() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice")
        .balance(5000)
        .whitelisted()
        .with_bank()
        .insert(&mut conn);

    let processor = Arc::new(MockProcessor::new());
    processor.decline_credits_for("alice");

    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    let summary = payday.run().await.unwrap();

    // The decline is recorded, the provisional debit comes back, and the
    // run still completes.
    assert_eq!(balance_of(&mut conn, "alice"), Cents(5000));
    assert_eq!(summary.n_credit_failures, 1);

    let exchanges = all_exchanges(&mut conn);
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].status, "failed");
    assert!(exchanges[0].error.as_deref().unwrap().contains("bank account closed"));
    assert_conservation(&mut conn, 5000);
}

#[tokio::test]
async fn test_unknown_credit_outcome_stays_provisional_until_reconciled() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice")
        .balance(5000)
        .whitelisted()
        .with_bank()
        .insert(&mut conn);

    let processor = Arc::new(MockProcessor::new());
    processor.fail_credits_for("alice");

    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    let summary = payday.run().await.unwrap();

    // Outcome unknown: the debit stands and the row stays provisional.
    // Guessing failure here could pay alice twice next cycle.
    assert_eq!(balance_of(&mut conn, "alice"), Cents::ZERO);
    assert_eq!(summary.n_credit_failures, 1);
    let exchanges = all_exchanges(&mut conn);
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].status, "pre");
    assert_conservation(&mut conn, 5000);

    // Next cycle: the call never reached the processor, so the row is
    // deleted, the balance restored, and the payout goes out for real.
    processor.heal();
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    payday.run().await.unwrap();

    assert_eq!(balance_of(&mut conn, "alice"), Cents::ZERO);
    assert_eq!(processor.credited_total(), 5000);
    let exchanges = all_exchanges(&mut conn);
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].status, "succeeded");
    assert_conservation(&mut conn, 5000);
}

#[tokio::test]
async fn test_pending_credit_blocks_further_payouts() {
    let (pool, _dir) = test_pool();
    let mut conn = pool.get().unwrap();
    SeedParticipant::new("alice")
        .balance(5000)
        .whitelisted()
        .with_bank()
        .insert(&mut conn);

    let processor = Arc::new(MockProcessor::new());
    processor.hold_credits_pending_for("alice");

    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    payday.run().await.unwrap();

    assert_eq!(balance_of(&mut conn, "alice"), Cents::ZERO);
    assert_eq!(all_exchanges(&mut conn)[0].status, "pending");

    // A second cycle while the credit is pending: reconciliation keeps
    // the row pending (the processor still says so) and no new payout is
    // issued on top of it.
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    payday.run().await.unwrap();

    let exchanges = all_exchanges(&mut conn);
    assert_eq!(exchanges.len(), 1);
    assert_eq!(exchanges[0].status, "pending");

    // The processor finally clears it; the next reconcile finalizes.
    processor.inject_transaction(
        &exchanges[0].id,
        payday::processor::TransactionOutcome::Succeeded,
        None,
    );
    let payday = Payday::start(pool.clone(), processor.clone(), test_config()).unwrap();
    payday.run().await.unwrap();

    let exchange = Exchange::find_by_id(&mut conn, &exchanges[0].id).unwrap().unwrap();
    assert_eq!(exchange.status, "succeeded");
    assert_conservation(&mut conn, 5000);
}
