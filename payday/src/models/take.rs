//! Take model
//!
//! Same event-sourced shape as tips, but for a member's nominal share of a
//! team's incoming funds. The nominal amount is capped at settlement time
//! by the team's working balance and by the growth throttle.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use patron_types::Cents;
use serde::{Deserialize, Serialize};

use super::tip::{latest_per_pair, HasAmount};
use crate::schema::takes;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = takes)]
pub struct Take {
    pub id: i32,
    pub team: String,
    pub member: String,
    pub amount_cents: i64,
    pub ctime: NaiveDateTime,
    pub mtime: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = takes)]
struct NewTake<'a> {
    team: &'a str,
    member: &'a str,
    amount_cents: i64,
    ctime: NaiveDateTime,
    mtime: NaiveDateTime,
}

impl Take {
    pub fn amount(&self) -> Cents {
        Cents(self.amount_cents)
    }

    /// Record a new nominal take for a (team, member) pair.
    pub fn set(conn: &mut SqliteConnection, team: &str, member: &str, amount: Cents) -> Result<()> {
        let now = chrono::Utc::now().naive_utc();
        diesel::insert_into(takes::table)
            .values(&NewTake {
                team,
                member,
                amount_cents: amount.cents(),
                ctime: now,
                mtime: now,
            })
            .execute(conn)
            .context("Failed to insert take")?;
        Ok(())
    }

    /// The current take per (team, member) pair as of `as_of`, excluding
    /// cancelled (zero) pairs.
    pub fn current_as_of(conn: &mut SqliteConnection, as_of: NaiveDateTime) -> Result<Vec<Self>> {
        let rows: Vec<Self> = takes::table
            .filter(takes::mtime.le(as_of))
            .order((takes::team, takes::member, takes::mtime, takes::id))
            .load(conn)
            .context("Failed to load take history")?;
        Ok(latest_per_pair(rows, |t| (t.team.clone(), t.member.clone())))
    }
}

impl HasAmount for Take {
    fn amount_cents(&self) -> i64 {
        self.amount_cents
    }
}
