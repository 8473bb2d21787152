//! PaydayRun model
//!
//! One row per settlement cycle. `ts_end` is NULL while the run is open,
//! and a partial unique index guarantees at most one open row — that
//! constraint, not application code, is what serializes runs. `stage`
//! records how far a run has gotten so a crashed run resumes at its next
//! unexecuted stage.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use patron_types::Cents;
use serde::{Deserialize, Serialize};

use crate::schema::paydays;

/// Stage values persisted in `paydays.stage`.
pub const STAGE_PAYIN: i32 = 1;
pub const STAGE_PAYOUT: i32 = 2;
pub const STAGE_STATS: i32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = paydays)]
pub struct PaydayRun {
    pub id: i32,
    pub ts_start: NaiveDateTime,
    pub ts_end: Option<NaiveDateTime>,
    pub stage: i32,
    pub n_participants: i32,
    pub n_tips: i32,
    pub n_transfers: i32,
    pub transfer_volume_cents: i64,
    pub n_charges: i32,
    pub charge_volume_cents: i64,
    pub charge_fees_cents: i64,
    pub n_charge_failures: i32,
    pub n_credits: i32,
    pub credit_volume_cents: i64,
    pub n_credit_failures: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = paydays)]
struct NewPaydayRun {
    ts_start: NaiveDateTime,
    stage: i32,
}

impl PaydayRun {
    /// Open a new run, or pick up the one already open.
    ///
    /// The insert races against the one-open-run index; losing the race
    /// means another invocation (or a crashed earlier one) owns the open
    /// row, and that row — with its stage counter — is the run to resume.
    pub fn start(conn: &mut SqliteConnection) -> Result<Self> {
        let insert = diesel::insert_into(paydays::table)
            .values(&NewPaydayRun {
                ts_start: chrono::Utc::now().naive_utc(),
                stage: 0,
            })
            .execute(conn);

        match insert {
            Ok(_) => {}
            Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {}
            Err(e) => return Err(e).context("Failed to open settlement run"),
        }

        Self::open(conn)?.context("No open settlement run after start")
    }

    /// The currently open run, if any.
    pub fn open(conn: &mut SqliteConnection) -> Result<Option<Self>> {
        paydays::table
            .filter(paydays::ts_end.is_null())
            .first(conn)
            .optional()
            .context("Failed to query open settlement run")
    }

    /// The most recent closed run before this one. Its window bounds the
    /// previous cycle's actual takes.
    pub fn previous_closed(&self, conn: &mut SqliteConnection) -> Result<Option<Self>> {
        paydays::table
            .filter(paydays::ts_end.is_not_null())
            .filter(paydays::id.lt(self.id))
            .order(paydays::id.desc())
            .first(conn)
            .optional()
            .context("Failed to query previous settlement run")
    }

    /// Persist a completed stage. Crashing after this point resumes at
    /// the next stage.
    pub fn set_stage(&mut self, conn: &mut SqliteConnection, stage: i32) -> Result<()> {
        diesel::update(paydays::table.find(self.id))
            .set(paydays::stage.eq(stage))
            .execute(conn)
            .context("Failed to persist stage")?;
        self.stage = stage;
        Ok(())
    }

    /// Close the run. Only called after every stage has completed.
    pub fn close(&mut self, conn: &mut SqliteConnection) -> Result<()> {
        let now = chrono::Utc::now().naive_utc();
        diesel::update(paydays::table.find(self.id))
            .set(paydays::ts_end.eq(Some(now)))
            .execute(conn)
            .context("Failed to close settlement run")?;
        self.ts_end = Some(now);
        Ok(())
    }

    pub fn add_charge_failure(conn: &mut SqliteConnection, run_id: i32) -> Result<()> {
        diesel::update(paydays::table.find(run_id))
            .set(paydays::n_charge_failures.eq(paydays::n_charge_failures + 1))
            .execute(conn)
            .context("Failed to count charge failure")?;
        Ok(())
    }

    pub fn add_credit_failure(conn: &mut SqliteConnection, run_id: i32) -> Result<()> {
        diesel::update(paydays::table.find(run_id))
            .set(paydays::n_credit_failures.eq(paydays::n_credit_failures + 1))
            .execute(conn)
            .context("Failed to count credit failure")?;
        Ok(())
    }

    /// Record how many participants this run settled. Written at payin
    /// commit, since the working set no longer exists by the stats stage.
    pub fn set_participants(conn: &mut SqliteConnection, run_id: i32, n: i64) -> Result<()> {
        diesel::update(paydays::table.find(run_id))
            .set(paydays::n_participants.eq(n as i32))
            .execute(conn)
            .context("Failed to record participant count")?;
        Ok(())
    }

    /// Fill the reporting counters from the run's ledger window.
    #[allow(clippy::too_many_arguments)]
    pub fn update_stats(
        conn: &mut SqliteConnection,
        run_id: i32,
        n_tips: i64,
        n_transfers: i64,
        transfer_volume: Cents,
        n_charges: i64,
        charge_volume: Cents,
        charge_fees: Cents,
        n_credits: i64,
        credit_volume: Cents,
    ) -> Result<()> {
        diesel::update(paydays::table.find(run_id))
            .set((
                paydays::n_tips.eq(n_tips as i32),
                paydays::n_transfers.eq(n_transfers as i32),
                paydays::transfer_volume_cents.eq(transfer_volume.cents()),
                paydays::n_charges.eq(n_charges as i32),
                paydays::charge_volume_cents.eq(charge_volume.cents()),
                paydays::charge_fees_cents.eq(charge_fees.cents()),
                paydays::n_credits.eq(n_credits as i32),
                paydays::credit_volume_cents.eq(credit_volume.cents()),
            ))
            .execute(conn)
            .context("Failed to update run statistics")?;
        Ok(())
    }

    pub fn find_by_id(conn: &mut SqliteConnection, run_id: i32) -> Result<Option<Self>> {
        paydays::table
            .find(run_id)
            .first(conn)
            .optional()
            .context("Failed to query settlement run")
    }
}
