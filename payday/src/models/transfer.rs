//! Transfer model
//!
//! Append-only record of internal money movement. Rows are never updated;
//! the set of transfers recorded since a run's start time is the run's
//! idempotence guard.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use patron_types::{Cents, TransferContext};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::schema::transfers;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = transfers)]
pub struct Transfer {
    pub id: i32,
    pub tipper: String,
    pub tippee: String,
    pub amount_cents: i64,
    pub context: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transfers)]
pub struct NewTransfer {
    pub tipper: String,
    pub tippee: String,
    pub amount_cents: i64,
    pub context: String,
    pub timestamp: NaiveDateTime,
}

impl Transfer {
    pub fn amount(&self) -> Cents {
        Cents(self.amount_cents)
    }

    pub fn record_batch(conn: &mut SqliteConnection, batch: &[NewTransfer]) -> Result<usize> {
        diesel::insert_into(transfers::table)
            .values(batch)
            .execute(conn)
            .context("Failed to append transfers")
    }

    /// (tipper, tippee) pairs already settled in the given context since
    /// `since` — re-running a stage must not re-apply these.
    pub fn pairs_since(
        conn: &mut SqliteConnection,
        since: NaiveDateTime,
        context: TransferContext,
    ) -> Result<HashSet<(String, String)>> {
        let rows: Vec<(String, String)> = transfers::table
            .filter(transfers::timestamp.ge(since))
            .filter(transfers::context.eq(context.as_str()))
            .select((transfers::tipper, transfers::tippee))
            .load(conn)
            .context("Failed to query settled pairs")?;
        Ok(rows.into_iter().collect())
    }

    /// Total take-context volume per (team, member) pair inside a window.
    /// Used to size the per-cycle take throttle.
    pub fn take_totals_between(
        conn: &mut SqliteConnection,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<HashMap<(String, String), i64>> {
        let rows: Vec<(String, String, i64)> = transfers::table
            .filter(transfers::timestamp.ge(start))
            .filter(transfers::timestamp.lt(end))
            .filter(transfers::context.eq(TransferContext::Take.as_str()))
            .select((transfers::tipper, transfers::tippee, transfers::amount_cents))
            .load(conn)
            .context("Failed to query prior takes")?;
        let mut totals = HashMap::new();
        for (team, member, amount) in rows {
            *totals.entry((team, member)).or_insert(0) += amount;
        }
        Ok(totals)
    }

    /// Count and volume of transfers recorded since `since`, optionally
    /// restricted to one context. Reporting only.
    pub fn stats_since(
        conn: &mut SqliteConnection,
        since: NaiveDateTime,
        context: Option<TransferContext>,
    ) -> Result<(i64, Cents)> {
        let rows: Vec<i64> = match context {
            Some(ctx) => transfers::table
                .filter(transfers::timestamp.ge(since))
                .filter(transfers::context.eq(ctx.as_str()))
                .select(transfers::amount_cents)
                .load(conn),
            None => transfers::table
                .filter(transfers::timestamp.ge(since))
                .select(transfers::amount_cents)
                .load(conn),
        }
        .context("Failed to query transfer stats")?;
        let volume = rows.iter().sum();
        Ok((rows.len() as i64, Cents(volume)))
    }

    pub fn all(conn: &mut SqliteConnection) -> Result<Vec<Self>> {
        transfers::table
            .order(transfers::id)
            .load(conn)
            .context("Failed to load transfers")
    }
}
