//! Settlement run orchestration
//!
//! Owns the open payday row and its persisted stage counter, and
//! sequences the run:
//!
//! 1. Reconcile unresolved exchanges against the processor (always first)
//! 2. Payin: snapshot -> holds -> transfer propagation -> capture -> commit
//! 3. Payout: bank credits net of next cycle's obligations
//! 4. Stats: fill the run's reporting counters
//!
//! Each stage runs only if the persisted counter says it has not, and the
//! counter advances only after the stage fully succeeds — a killed
//! process resumes at its last unfinished stage. The store's one-open-run
//! constraint means a second invocation picks up the same open row rather
//! than starting a new cycle.

use anyhow::{Context, Result};
use patron_types::Cents;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::PaydayConfig;
use crate::db::DbPool;
use crate::models::payday_run::{STAGE_PAYIN, STAGE_PAYOUT, STAGE_STATS};
use crate::models::{Exchange, PaydayRun, Transfer};
use crate::processor::Processor;
use crate::services::{commit, holds, payouts, reconcile, snapshot, transfers};

/// What a completed run reports to the rest of the platform.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub payday_id: i32,
    pub n_participants: i32,
    pub n_transfers: i32,
    pub transfer_volume: Cents,
    pub n_charges: i32,
    pub charge_volume: Cents,
    pub n_charge_failures: i32,
    pub n_credits: i32,
    pub credit_volume: Cents,
    pub n_credit_failures: i32,
}

impl From<PaydayRun> for RunSummary {
    fn from(run: PaydayRun) -> Self {
        Self {
            payday_id: run.id,
            n_participants: run.n_participants,
            n_transfers: run.n_transfers,
            transfer_volume: Cents(run.transfer_volume_cents),
            n_charges: run.n_charges,
            charge_volume: Cents(run.charge_volume_cents),
            n_charge_failures: run.n_charge_failures,
            n_credits: run.n_credits,
            credit_volume: Cents(run.credit_volume_cents),
            n_credit_failures: run.n_credit_failures,
        }
    }
}

/// One settlement run. Construct once per invocation, discard after.
pub struct Payday {
    pool: DbPool,
    processor: Arc<dyn Processor>,
    config: PaydayConfig,
    run: PaydayRun,
}

impl Payday {
    /// Open a new run or adopt the one already open.
    pub fn start(
        pool: DbPool,
        processor: Arc<dyn Processor>,
        config: PaydayConfig,
    ) -> Result<Self> {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        let run = PaydayRun::start(&mut conn)?;
        if run.stage > 0 {
            warn!(
                payday_id = run.id,
                stage = run.stage,
                "Resuming interrupted settlement run"
            );
        } else {
            info!(payday_id = run.id, "Settlement run open");
        }
        Ok(Self {
            pool,
            processor,
            config,
            run,
        })
    }

    pub fn payday_id(&self) -> i32 {
        self.run.id
    }

    /// Execute all remaining stages and close the run.
    pub async fn run(mut self) -> Result<RunSummary> {
        reconcile::sync_with_processor(
            &self.pool,
            Arc::clone(&self.processor),
            self.config.reconcile_grace_secs,
        )
        .await
        .context("Reconciliation failed")?;

        if self.run.stage < STAGE_PAYIN {
            self.payin().await.context("Payin stage failed")?;
            self.advance(STAGE_PAYIN)?;
        }

        if self.run.stage < STAGE_PAYOUT {
            payouts::run_payouts(
                &self.pool,
                Arc::clone(&self.processor),
                self.run.id,
                &self.config,
            )
            .await
            .context("Payout stage failed")?;
            self.advance(STAGE_PAYOUT)?;
        }

        if self.run.stage < STAGE_STATS {
            self.update_stats().context("Stats stage failed")?;
            self.advance(STAGE_STATS)?;
        }

        let mut conn = self.pool.get().context("Failed to get DB connection")?;
        self.run.close(&mut conn)?;

        let closed = PaydayRun::find_by_id(&mut conn, self.run.id)?
            .context("Closed run vanished")?;
        let summary = RunSummary::from(closed);
        info!(
            payday_id = summary.payday_id,
            participants = summary.n_participants,
            transfers = summary.n_transfers,
            transfer_volume = %summary.transfer_volume,
            charges = summary.n_charges,
            charge_failures = summary.n_charge_failures,
            credits = summary.n_credits,
            credit_failures = summary.n_credit_failures,
            "Settlement run closed"
        );
        Ok(summary)
    }

    /// Pull money in and move it through the pledge/take graph.
    async fn payin(&mut self) -> Result<()> {
        let mut ws = {
            let pool = self.pool.clone();
            let run = self.run.clone();
            tokio::task::spawn_blocking(move || {
                let mut conn = pool.get().context("Failed to get DB connection")?;
                snapshot::prepare(&mut conn, &run)
            })
            .await
            .context("Snapshot task join error")??
        };

        let hold_map = holds::create_holds(
            &self.pool,
            Arc::clone(&self.processor),
            self.run.id,
            &mut ws,
            self.config.processor_concurrency,
        )
        .await?;

        let n_tips = transfers::apply_tips(&mut ws);
        let n_takes = transfers::apply_takes(&mut ws);
        info!(tips = n_tips, takes = n_takes, "Transfers propagated");

        holds::settle_holds(
            &self.pool,
            Arc::clone(&self.processor),
            self.run.id,
            &ws,
            &hold_map,
            self.config.processor_concurrency,
        )
        .await?;

        let pool = self.pool.clone();
        let run = self.run.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get().context("Failed to get DB connection")?;
            commit::commit_balances(&mut conn, &run, &ws)
        })
        .await
        .context("Commit task join error")??;

        Ok(())
    }

    /// Fill the reporting counters from the run's ledger window.
    fn update_stats(&self) -> Result<()> {
        let mut conn = self.pool.get().context("Failed to get DB connection")?;
        let since = self.run.ts_start;

        let (n_transfers, transfer_volume) = Transfer::stats_since(&mut conn, since, None)?;
        let (n_tips, _) =
            Transfer::stats_since(&mut conn, since, Some(patron_types::TransferContext::Tip))?;
        let (n_charges, charge_volume, charge_fees) =
            Exchange::charge_stats_since(&mut conn, since)?;
        let (n_credits, credit_volume) = Exchange::credit_stats_since(&mut conn, since)?;

        PaydayRun::update_stats(
            &mut conn,
            self.run.id,
            n_tips,
            n_transfers,
            transfer_volume,
            n_charges,
            charge_volume,
            charge_fees,
            n_credits,
            credit_volume,
        )
    }

    fn advance(&mut self, stage: i32) -> Result<()> {
        let mut conn = self.pool.get().context("Failed to get DB connection")?;
        self.run.set_stage(&mut conn, stage)?;
        info!(payday_id = self.run.id, stage, "Stage complete");
        Ok(())
    }
}
