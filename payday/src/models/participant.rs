//! Participant model
//!
//! Participants are owned by account-management code elsewhere in the
//! platform; the settlement engine reads identity, routes, and flags, and
//! mutates `balance_cents` and `last_charge_result` only.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use patron_types::Cents;
use serde::{Deserialize, Serialize};

use crate::schema::participants;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = participants)]
pub struct Participant {
    pub id: String,
    pub username: String,
    pub claimed_at: Option<NaiveDateTime>,
    pub balance_cents: i64,
    pub giving_cents: i64,
    pub receiving_cents: i64,
    pub taking_cents: i64,
    pub goal_cents: Option<i64>,
    pub is_suspicious: Option<bool>,
    pub processor_ref: Option<String>,
    pub card_ref: Option<String>,
    pub bank_ref: Option<String>,
    pub last_charge_result: Option<String>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = participants)]
pub struct NewParticipant {
    pub id: String,
    pub username: String,
    pub claimed_at: Option<NaiveDateTime>,
    pub balance_cents: i64,
    pub goal_cents: Option<i64>,
    pub is_suspicious: Option<bool>,
    pub processor_ref: Option<String>,
    pub card_ref: Option<String>,
    pub bank_ref: Option<String>,
}

impl Participant {
    pub fn balance(&self) -> Cents {
        Cents(self.balance_cents)
    }

    /// A participant takes part in settlement once their account is claimed
    /// and as long as they are not flagged suspicious.
    pub fn is_eligible(&self) -> bool {
        self.claimed_at.is_some() && self.is_suspicious != Some(true)
    }

    /// External money movement additionally requires an explicit whitelist
    /// decision.
    pub fn is_whitelisted(&self) -> bool {
        self.is_suspicious == Some(false)
    }

    /// A negative goal means the participant rejects pledges.
    pub fn accepts_pledges(&self) -> bool {
        !matches!(self.goal_cents, Some(goal) if goal < 0)
    }

    pub fn create(conn: &mut SqliteConnection, new: NewParticipant) -> Result<Self> {
        let id = new.id.clone();
        diesel::insert_into(participants::table)
            .values(&new)
            .execute(conn)
            .context("Failed to insert participant")?;
        participants::table
            .find(id)
            .first(conn)
            .context("Failed to retrieve created participant")
    }

    pub fn find_by_id(conn: &mut SqliteConnection, participant_id: &str) -> Result<Option<Self>> {
        participants::table
            .find(participant_id)
            .first(conn)
            .optional()
            .context("Failed to query participant")
    }

    /// All participants eligible for settlement, in stable
    /// oldest-claimed-first order.
    pub fn eligible_for_settlement(conn: &mut SqliteConnection) -> Result<Vec<Self>> {
        let mut rows: Vec<Self> = participants::table
            .filter(participants::claimed_at.is_not_null())
            .filter(
                participants::is_suspicious
                    .is_null()
                    .or(participants::is_suspicious.eq(false)),
            )
            .load(conn)
            .context("Failed to query eligible participants")?;
        rows.sort_by(|a, b| (a.claimed_at, &a.id).cmp(&(b.claimed_at, &b.id)));
        Ok(rows)
    }

    /// Record a failed card operation. The string is the processor's
    /// decline reason, surfaced to the participant by platform code.
    pub fn mark_charge_failed(
        conn: &mut SqliteConnection,
        participant_id: &str,
        error: &str,
    ) -> Result<()> {
        diesel::update(participants::table.find(participant_id))
            .set(participants::last_charge_result.eq(Some(error)))
            .execute(conn)
            .context("Failed to record charge failure")?;
        Ok(())
    }

    /// Clear the decline marker after a successful card operation.
    pub fn mark_charge_success(conn: &mut SqliteConnection, participant_id: &str) -> Result<()> {
        diesel::update(participants::table.find(participant_id))
            .set(participants::last_charge_result.eq(None::<String>))
            .execute(conn)
            .context("Failed to clear charge result")?;
        Ok(())
    }

    /// Sum of all settled balances, for conservation checks and reporting.
    pub fn total_balance(conn: &mut SqliteConnection) -> Result<Cents> {
        let total: Option<i64> = participants::table
            .select(diesel::dsl::sum(participants::balance_cents))
            .first(conn)
            .context("Failed to sum balances")?;
        Ok(Cents(total.unwrap_or(0)))
    }
}
