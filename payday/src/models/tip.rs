//! Tip model
//!
//! A tip row is one amount-change event for a (tipper, tippee) pair; the
//! newest row as of a given instant is the pair's current pledge. Amount
//! zero means "cancelled, keep history".

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use patron_types::Cents;
use serde::{Deserialize, Serialize};

use crate::schema::tips;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = tips)]
pub struct Tip {
    pub id: i32,
    pub tipper: String,
    pub tippee: String,
    pub amount_cents: i64,
    pub ctime: NaiveDateTime,
    pub mtime: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = tips)]
struct NewTip<'a> {
    tipper: &'a str,
    tippee: &'a str,
    amount_cents: i64,
    ctime: NaiveDateTime,
    mtime: NaiveDateTime,
}

impl Tip {
    pub fn amount(&self) -> Cents {
        Cents(self.amount_cents)
    }

    /// Record a new pledge amount for a pair. Platform CRUD surface; the
    /// engine itself never writes tips.
    pub fn set(
        conn: &mut SqliteConnection,
        tipper: &str,
        tippee: &str,
        amount: Cents,
    ) -> Result<()> {
        let now = chrono::Utc::now().naive_utc();
        diesel::insert_into(tips::table)
            .values(&NewTip {
                tipper,
                tippee,
                amount_cents: amount.cents(),
                ctime: now,
                mtime: now,
            })
            .execute(conn)
            .context("Failed to insert tip")?;
        Ok(())
    }

    /// The current tip per (tipper, tippee) pair as of `as_of`: the row
    /// with the newest mtime (ties broken by id). Cancelled pairs
    /// (current amount zero) are dropped.
    pub fn current_as_of(conn: &mut SqliteConnection, as_of: NaiveDateTime) -> Result<Vec<Self>> {
        let rows: Vec<Self> = tips::table
            .filter(tips::mtime.le(as_of))
            .order((tips::tipper, tips::tippee, tips::mtime, tips::id))
            .load(conn)
            .context("Failed to load tip history")?;
        Ok(latest_per_pair(rows, |t| (t.tipper.clone(), t.tippee.clone())))
    }
}

/// Keep only the last row per pair from a stream sorted pair-first, then
/// drop rows whose current amount is zero.
pub(crate) fn latest_per_pair<T, K, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    K: PartialEq,
    F: Fn(&T) -> K,
    T: HasAmount,
{
    let mut current: Vec<T> = Vec::new();
    for row in rows {
        match current.last_mut() {
            Some(last) if key(last) == key(&row) => *last = row,
            _ => current.push(row),
        }
    }
    current.retain(|t| t.amount_cents() > 0);
    current
}

pub(crate) trait HasAmount {
    fn amount_cents(&self) -> i64;
}

impl HasAmount for Tip {
    fn amount_cents(&self) -> i64 {
        self.amount_cents
    }
}
