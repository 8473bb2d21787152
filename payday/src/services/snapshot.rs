//! Snapshot preparation
//!
//! Freezes the graph a settlement run will settle: one working row per
//! eligible participant, the current nonzero tip per pair, the current
//! nonzero take per pair, and the per-participant giving total used to
//! size card holds. Everything is read in one transaction as of the run's
//! start time, so processor latency later in the run cannot shift the
//! graph under us, and a resumed run rebuilds the same snapshot.
//!
//! Propagation over the snapshot is an explicit in-process algorithm over
//! this arena, keyed by participant id — settlement order and cap logic
//! are unit-testable without a database.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use patron_types::{Cents, TransferContext};
use std::collections::HashMap;
use tracing::info;

use crate::models::{PaydayRun, Participant, Take, Tip, Transfer};

/// One participant's mutable view for the duration of a run.
#[derive(Debug, Clone)]
pub struct WorkingParticipant {
    pub id: String,
    pub claimed_at: NaiveDateTime,
    /// Settled balance at snapshot time. Never changes during the run.
    pub old_balance: Cents,
    /// Working balance; may go negative only when backed by a card hold.
    pub new_balance: Cents,
    /// Total the participant pledges out this cycle (unsettled tips only).
    pub giving_today: Cents,
    /// Set once a covering card hold exists on the processor.
    pub hold_ok: bool,
    pub card_ref: Option<String>,
    pub bank_ref: Option<String>,
}

impl WorkingParticipant {
    /// Amount a card hold must cover before this participant's pledges
    /// can exceed their settled balance.
    pub fn shortfall(&self) -> Cents {
        (self.giving_today - self.old_balance).max(Cents::ZERO)
    }
}

/// A pledge frozen into the snapshot. `settled` flips when the transfer
/// engine consumes it, making double application a no-op.
#[derive(Debug, Clone)]
pub struct SnapshotTip {
    pub tipper: String,
    pub tippee: String,
    pub amount: Cents,
    pub settled: bool,
}

/// A team share frozen into the snapshot, with the previous cycle's
/// actual take for the growth throttle.
#[derive(Debug, Clone)]
pub struct SnapshotTake {
    pub team: String,
    pub member: String,
    pub amount: Cents,
    pub last_take: Cents,
    pub settled: bool,
}

/// An internal movement computed this run, not yet committed.
#[derive(Debug, Clone)]
pub struct PendingTransfer {
    pub tipper: String,
    pub tippee: String,
    pub amount: Cents,
    pub context: TransferContext,
}

/// The frozen working set for one settlement run.
#[derive(Debug, Default)]
pub struct WorkingSet {
    participants: HashMap<String, WorkingParticipant>,
    /// Participant ids in processing order: oldest claimed first, id as
    /// tiebreaker. Earlier-verified participants are settled first so
    /// later ones cannot starve them of capped funds.
    order: Vec<String>,
    pub tips: Vec<SnapshotTip>,
    pub takes: Vec<SnapshotTake>,
    pub pending_transfers: Vec<PendingTransfer>,
}

impl WorkingSet {
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn participant(&self, id: &str) -> Option<&WorkingParticipant> {
        self.participants.get(id)
    }

    pub fn participant_mut(&mut self, id: &str) -> Option<&mut WorkingParticipant> {
        self.participants.get_mut(id)
    }

    pub fn balance_of(&self, id: &str) -> Option<Cents> {
        self.participants.get(id).map(|p| p.new_balance)
    }

    /// Move `amount` from one working balance to another. Both sides must
    /// be in the arena; the caller has already decided the move is funded.
    pub fn shift(&mut self, from: &str, to: &str, amount: Cents) {
        if let Some(source) = self.participants.get_mut(from) {
            source.new_balance -= amount;
        }
        if let Some(target) = self.participants.get_mut(to) {
            target.new_balance += amount;
        }
    }

    /// Insert a participant, keeping the processing order stable.
    /// Exposed for the transfer engine's unit tests.
    pub fn insert_participant(&mut self, wp: WorkingParticipant) {
        let key = (wp.claimed_at, wp.id.clone());
        let pos = self
            .order
            .binary_search_by(|probe| {
                let p = &self.participants[probe];
                (p.claimed_at, p.id.clone()).cmp(&key)
            })
            .unwrap_or_else(|e| e);
        self.order.insert(pos, wp.id.clone());
        self.participants.insert(wp.id.clone(), wp);
    }
}

/// Build the working set for `run` in one transaction.
pub fn prepare(conn: &mut SqliteConnection, run: &PaydayRun) -> Result<WorkingSet> {
    conn.transaction(|conn| {
        let eligible = Participant::eligible_for_settlement(conn)?;

        // Idempotence guard: anything already settled since the run
        // started stays settled on a resume.
        let settled_tips = Transfer::pairs_since(conn, run.ts_start, TransferContext::Tip)?;
        let settled_takes = Transfer::pairs_since(conn, run.ts_start, TransferContext::Take)?;

        let accepts_pledges: HashMap<&str, bool> = eligible
            .iter()
            .map(|p| (p.id.as_str(), p.accepts_pledges()))
            .collect();

        let mut ws = WorkingSet::default();
        for p in &eligible {
            ws.insert_participant(WorkingParticipant {
                id: p.id.clone(),
                claimed_at: p.claimed_at.context("Eligible participant not claimed")?,
                old_balance: p.balance(),
                new_balance: p.balance(),
                giving_today: Cents::ZERO,
                hold_ok: false,
                card_ref: p.card_ref.clone(),
                bank_ref: p.bank_ref.clone(),
            });
        }

        for tip in Tip::current_as_of(conn, run.ts_start)? {
            if tip.tipper == tip.tippee {
                continue;
            }
            if ws.participant(&tip.tipper).is_none() || ws.participant(&tip.tippee).is_none() {
                continue;
            }
            if !accepts_pledges.get(tip.tippee.as_str()).copied().unwrap_or(false) {
                continue;
            }
            if settled_tips.contains(&(tip.tipper.clone(), tip.tippee.clone())) {
                continue;
            }
            ws.tips.push(SnapshotTip {
                amount: tip.amount(),
                tipper: tip.tipper,
                tippee: tip.tippee,
                settled: false,
            });
        }

        // Unsettled pledges size the card holds. A resumed run whose
        // transfers already landed therefore plans no new holds.
        for tip in &ws.tips {
            if let Some(wp) = ws.participants.get_mut(&tip.tipper) {
                wp.giving_today += tip.amount;
            }
        }

        // Previous cycle's actual takes bound this cycle's growth.
        let last_takes = match run.previous_closed(conn)? {
            Some(prev) => Transfer::take_totals_between(
                conn,
                prev.ts_start,
                prev.ts_end.unwrap_or(run.ts_start),
            )?,
            None => HashMap::new(),
        };

        for take in Take::current_as_of(conn, run.ts_start)? {
            if take.team == take.member {
                continue;
            }
            if ws.participant(&take.team).is_none() || ws.participant(&take.member).is_none() {
                continue;
            }
            if settled_takes.contains(&(take.team.clone(), take.member.clone())) {
                continue;
            }
            let last_take = last_takes
                .get(&(take.team.clone(), take.member.clone()))
                .copied()
                .map(Cents)
                .unwrap_or(Cents::ZERO);
            ws.takes.push(SnapshotTake {
                amount: take.amount(),
                team: take.team,
                member: take.member,
                last_take,
                settled: false,
            });
        }

        // Tips and takes settle in source order; pre-sorting here keeps
        // the propagation loops simple and the output deterministic.
        let position: HashMap<&str, usize> = ws
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        ws.tips.sort_by(|a, b| {
            (position[a.tipper.as_str()], &a.tippee).cmp(&(position[b.tipper.as_str()], &b.tippee))
        });
        ws.takes.sort_by(|a, b| {
            (position[a.team.as_str()], &a.member).cmp(&(position[b.team.as_str()], &b.member))
        });

        info!(
            participants = ws.len(),
            tips = ws.tips.len(),
            takes = ws.takes.len(),
            "Snapshot prepared"
        );

        Ok(ws)
    })
}
