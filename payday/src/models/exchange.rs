//! Exchange model
//!
//! An exchange is one movement of money between Patron and the outside
//! world. Positive amounts are card money in, negative amounts are bank
//! money out.
//!
//! The provisional protocol keeps the ledger and the balances consistent
//! across crashes:
//! 1. `record_pre` writes the row with status `pre` *before* the processor
//!    call; outbound amounts debit the stored balance in the same
//!    transaction, inbound amounts touch nothing yet.
//! 2. `record_result` resolves the row once the outcome is known; inbound
//!    credits apply exactly once on success, outbound debits are restored
//!    exactly once on failure.
//! 3. `delete_and_restore` removes a provisional row whose call never
//!    reached the processor, undoing any provisional debit.
//!
//! The exchange id is a locally generated uuid carried in the metadata of
//! every processor call, so a crashed run can find the call's true outcome
//! later.

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use patron_types::{Cents, ExchangeStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use uuid::Uuid;

use crate::schema::{exchanges, participants};

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = exchanges)]
pub struct Exchange {
    pub id: String,
    pub participant_id: String,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub status: String,
    pub route: Option<String>,
    pub error: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = exchanges)]
pub struct NewExchange {
    pub id: String,
    pub participant_id: String,
    pub amount_cents: i64,
    pub fee_cents: i64,
    pub status: String,
    pub route: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Exchange {
    pub fn amount(&self) -> Cents {
        Cents(self.amount_cents)
    }

    pub fn fee(&self) -> Cents {
        Cents(self.fee_cents)
    }

    pub fn status(&self) -> Result<ExchangeStatus> {
        ExchangeStatus::from_str(&self.status)
            .map_err(|e| anyhow::anyhow!("Corrupt exchange status: {}", e))
    }

    pub fn is_inbound(&self) -> bool {
        self.amount_cents > 0
    }

    /// Write the provisional row. Outbound amounts debit the stored
    /// balance in the same transaction, so the money is already set aside
    /// if the process dies mid-call.
    pub fn record_pre(
        conn: &mut SqliteConnection,
        participant_id: &str,
        amount: Cents,
        fee: Cents,
        route: Option<&str>,
    ) -> Result<Self> {
        let exchange_id = Uuid::new_v4().to_string();
        let new = NewExchange {
            id: exchange_id.clone(),
            participant_id: participant_id.to_string(),
            amount_cents: amount.cents(),
            fee_cents: fee.cents(),
            status: ExchangeStatus::Pre.as_str().to_string(),
            route: route.map(|r| r.to_string()),
            created_at: chrono::Utc::now().naive_utc(),
        };
        conn.transaction(|conn| {
            diesel::insert_into(exchanges::table)
                .values(&new)
                .execute(conn)
                .context("Failed to insert provisional exchange")?;
            if amount.is_negative() {
                diesel::update(participants::table.find(participant_id))
                    .set(
                        participants::balance_cents
                            .eq(participants::balance_cents + amount.cents()),
                    )
                    .execute(conn)
                    .context("Failed to apply provisional debit")?;
            }
            exchanges::table
                .find(&exchange_id)
                .first(conn)
                .context("Failed to retrieve provisional exchange")
        })
    }

    /// Resolve a provisional (or pending) exchange with the processor's
    /// outcome. Idempotent: a row already in a final state is left alone.
    pub fn record_result(
        conn: &mut SqliteConnection,
        exchange_id: &str,
        outcome: ExchangeStatus,
        error: Option<&str>,
    ) -> Result<()> {
        if outcome == ExchangeStatus::Pre {
            bail!("An exchange cannot be resolved back to pre");
        }
        conn.transaction(|conn| {
            let exchange: Exchange = exchanges::table
                .find(exchange_id)
                .first(conn)
                .context("Failed to load exchange for resolution")?;
            if exchange.status()?.is_final() {
                return Ok(());
            }

            diesel::update(exchanges::table.find(exchange_id))
                .set((
                    exchanges::status.eq(outcome.as_str()),
                    exchanges::error.eq(error),
                ))
                .execute(conn)
                .context("Failed to update exchange status")?;

            match outcome {
                ExchangeStatus::Succeeded if exchange.is_inbound() => {
                    // Inbound credits land only once the money is real.
                    let credit = exchange.amount_cents - exchange.fee_cents;
                    diesel::update(participants::table.find(&exchange.participant_id))
                        .set(participants::balance_cents.eq(participants::balance_cents + credit))
                        .execute(conn)
                        .context("Failed to apply exchange credit")?;
                }
                ExchangeStatus::Failed if !exchange.is_inbound() => {
                    // The provisional debit never left the building.
                    diesel::update(participants::table.find(&exchange.participant_id))
                        .set(
                            participants::balance_cents
                                .eq(participants::balance_cents - exchange.amount_cents),
                        )
                        .execute(conn)
                        .context("Failed to restore provisional debit")?;
                }
                _ => {}
            }
            Ok(())
        })
    }

    /// Remove a provisional row whose call never reached the processor,
    /// restoring any provisional debit. Only `pre` rows qualify; anything
    /// the processor has acknowledged must be resolved, not deleted.
    pub fn delete_and_restore(conn: &mut SqliteConnection, exchange_id: &str) -> Result<()> {
        conn.transaction(|conn| {
            let exchange: Exchange = exchanges::table
                .find(exchange_id)
                .first(conn)
                .context("Failed to load exchange for deletion")?;
            if exchange.status()? != ExchangeStatus::Pre {
                bail!(
                    "Refusing to delete exchange {} in state {}",
                    exchange_id,
                    exchange.status
                );
            }
            diesel::delete(exchanges::table.find(exchange_id))
                .execute(conn)
                .context("Failed to delete provisional exchange")?;
            if !exchange.is_inbound() {
                diesel::update(participants::table.find(&exchange.participant_id))
                    .set(
                        participants::balance_cents
                            .eq(participants::balance_cents - exchange.amount_cents),
                    )
                    .execute(conn)
                    .context("Failed to restore balance after deletion")?;
            }
            Ok(())
        })
    }

    pub fn find_by_id(conn: &mut SqliteConnection, exchange_id: &str) -> Result<Option<Self>> {
        exchanges::table
            .find(exchange_id)
            .first(conn)
            .optional()
            .context("Failed to query exchange")
    }

    /// Exchanges whose outcome is not yet final, oldest first.
    pub fn unresolved(conn: &mut SqliteConnection) -> Result<Vec<Self>> {
        exchanges::table
            .filter(
                exchanges::status
                    .eq(ExchangeStatus::Pre.as_str())
                    .or(exchanges::status.eq(ExchangeStatus::Pending.as_str())),
            )
            .order(exchanges::created_at)
            .load(conn)
            .context("Failed to query unresolved exchanges")
    }

    /// Participants with an outbound exchange still in flight. No new
    /// payout is issued while one is unresolved.
    pub fn participants_with_pending_outbound(
        conn: &mut SqliteConnection,
    ) -> Result<HashSet<String>> {
        let rows: Vec<String> = exchanges::table
            .filter(exchanges::amount_cents.lt(0))
            .filter(
                exchanges::status
                    .eq(ExchangeStatus::Pre.as_str())
                    .or(exchanges::status.eq(ExchangeStatus::Pending.as_str())),
            )
            .select(exchanges::participant_id)
            .load(conn)
            .context("Failed to query in-flight payouts")?;
        Ok(rows.into_iter().collect())
    }

    /// Net amount credited per participant by succeeded inbound exchanges
    /// since `since`. The balance committer uses this to know what this
    /// run has already accounted for.
    pub fn inbound_nominal_since(
        conn: &mut SqliteConnection,
        since: NaiveDateTime,
    ) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64, i64)> = exchanges::table
            .filter(exchanges::created_at.ge(since))
            .filter(exchanges::amount_cents.gt(0))
            .filter(exchanges::status.eq(ExchangeStatus::Succeeded.as_str()))
            .select((
                exchanges::participant_id,
                exchanges::amount_cents,
                exchanges::fee_cents,
            ))
            .load(conn)
            .context("Failed to query run charges")?;
        let mut nominal = HashMap::new();
        for (participant_id, amount, fee) in rows {
            *nominal.entry(participant_id).or_insert(0) += amount - fee;
        }
        Ok(nominal)
    }

    /// (count, gross volume, fees) of succeeded card charges since `since`.
    pub fn charge_stats_since(
        conn: &mut SqliteConnection,
        since: NaiveDateTime,
    ) -> Result<(i64, Cents, Cents)> {
        let rows: Vec<(i64, i64)> = exchanges::table
            .filter(exchanges::created_at.ge(since))
            .filter(exchanges::amount_cents.gt(0))
            .filter(exchanges::status.eq(ExchangeStatus::Succeeded.as_str()))
            .select((exchanges::amount_cents, exchanges::fee_cents))
            .load(conn)
            .context("Failed to query charge stats")?;
        let volume = rows.iter().map(|(a, _)| a).sum();
        let fees = rows.iter().map(|(_, f)| f).sum();
        Ok((rows.len() as i64, Cents(volume), Cents(fees)))
    }

    /// (count, volume) of succeeded bank credits since `since`.
    pub fn credit_stats_since(
        conn: &mut SqliteConnection,
        since: NaiveDateTime,
    ) -> Result<(i64, Cents)> {
        let rows: Vec<i64> = exchanges::table
            .filter(exchanges::created_at.ge(since))
            .filter(exchanges::amount_cents.lt(0))
            .filter(exchanges::status.eq(ExchangeStatus::Succeeded.as_str()))
            .select(exchanges::amount_cents)
            .load(conn)
            .context("Failed to query credit stats")?;
        let volume: i64 = rows.iter().map(|a| a.abs()).sum();
        Ok((rows.len() as i64, Cents(volume)))
    }
}
