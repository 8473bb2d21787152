//! Mock card/bank processor
//!
//! Simulates processor state without external dependencies: holds with
//! capture/void lifecycle, transactions findable by reference, and
//! per-participant failure injection (declines, transport failures,
//! pending credits).

use async_trait::async_trait;
use patron_types::Cents;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use payday::processor::{
    Hold, Processor, ProcessorError, ProcessorResult, ProcessorTransaction, TransactionOutcome,
};

#[derive(Debug, Clone)]
pub struct MockHold {
    pub hold: Hold,
    pub captured: Option<Cents>,
    pub voided: bool,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    holds: HashMap<String, MockHold>,
    transactions: HashMap<String, ProcessorTransaction>,
    credited: i64,
    decline_hold: HashSet<String>,
    capture_transport_failure: HashSet<String>,
    decline_credit: HashSet<String>,
    credit_transport_failure: HashSet<String>,
    credit_pending: HashSet<String>,
}

/// In-memory processor. All failure knobs are keyed by participant id.
#[derive(Default)]
pub struct MockProcessor {
    state: Mutex<MockState>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decline_holds_for(&self, participant_id: &str) {
        self.lock().decline_hold.insert(participant_id.to_string());
    }

    /// Captures for this participant fail at the transport layer: the
    /// call never reaches the processor, so no transaction is recorded.
    pub fn fail_captures_for(&self, participant_id: &str) {
        self.lock()
            .capture_transport_failure
            .insert(participant_id.to_string());
    }

    pub fn decline_credits_for(&self, participant_id: &str) {
        self.lock()
            .decline_credit
            .insert(participant_id.to_string());
    }

    /// Credits for this participant fail at the transport layer with no
    /// transaction recorded.
    pub fn fail_credits_for(&self, participant_id: &str) {
        self.lock()
            .credit_transport_failure
            .insert(participant_id.to_string());
    }

    pub fn hold_credits_pending_for(&self, participant_id: &str) {
        self.lock()
            .credit_pending
            .insert(participant_id.to_string());
    }

    /// Clear every failure knob; the processor behaves from here on.
    pub fn heal(&self) {
        let mut state = self.lock();
        state.decline_hold.clear();
        state.capture_transport_failure.clear();
        state.decline_credit.clear();
        state.credit_transport_failure.clear();
        state.credit_pending.clear();
    }

    /// Plant a processor-side transaction record, as if a call from a
    /// crashed process had actually landed.
    pub fn inject_transaction(
        &self,
        reference: &str,
        outcome: TransactionOutcome,
        error: Option<&str>,
    ) {
        self.lock().transactions.insert(
            reference.to_string(),
            ProcessorTransaction {
                reference: reference.to_string(),
                outcome,
                error: error.map(|e| e.to_string()),
            },
        );
    }

    pub fn holds_created(&self) -> usize {
        self.lock().holds.len()
    }

    pub fn live_holds(&self) -> Vec<Hold> {
        self.lock()
            .holds
            .values()
            .filter(|h| !h.voided && h.captured.is_none())
            .map(|h| h.hold.clone())
            .collect()
    }

    pub fn voided_holds(&self) -> usize {
        self.lock().holds.values().filter(|h| h.voided).count()
    }

    /// Total actually captured from cards, in cents.
    pub fn captured_total(&self) -> i64 {
        self.lock()
            .holds
            .values()
            .filter_map(|h| h.captured)
            .map(|c| c.cents())
            .sum()
    }

    /// Total actually credited to banks, in cents.
    pub fn credited_total(&self) -> i64 {
        self.lock().credited
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock processor poisoned")
    }
}

#[async_trait]
impl Processor for MockProcessor {
    async fn create_hold(
        &self,
        _card_ref: &str,
        participant_id: &str,
        amount: Cents,
        marker: &str,
    ) -> ProcessorResult<Hold> {
        let mut state = self.lock();
        if state.decline_hold.contains(participant_id) {
            return Err(ProcessorError::Declined("card declined".into()));
        }
        state.next_id += 1;
        let hold = Hold {
            id: format!("hold-{}", state.next_id),
            participant_id: participant_id.to_string(),
            amount,
            marker: marker.to_string(),
        };
        state.holds.insert(
            hold.id.clone(),
            MockHold {
                hold: hold.clone(),
                captured: None,
                voided: false,
            },
        );
        Ok(hold)
    }

    async fn capture_hold(
        &self,
        hold: &Hold,
        amount: Cents,
        reference: &str,
    ) -> ProcessorResult<()> {
        let mut state = self.lock();
        if state
            .capture_transport_failure
            .contains(&hold.participant_id)
        {
            return Err(ProcessorError::Transport("connection reset".into()));
        }
        let entry = state
            .holds
            .get_mut(&hold.id)
            .ok_or_else(|| ProcessorError::HoldNotFound(hold.id.clone()))?;
        if entry.voided {
            return Err(ProcessorError::Rejected("hold already voided".into()));
        }
        if entry.captured.is_some() {
            return Err(ProcessorError::Rejected("hold already captured".into()));
        }
        if amount > entry.hold.amount {
            return Err(ProcessorError::Rejected(
                "capture exceeds authorization".into(),
            ));
        }
        entry.captured = Some(amount);
        state.transactions.insert(
            reference.to_string(),
            ProcessorTransaction {
                reference: reference.to_string(),
                outcome: TransactionOutcome::Succeeded,
                error: None,
            },
        );
        Ok(())
    }

    async fn void_hold(&self, hold: &Hold) -> ProcessorResult<()> {
        let mut state = self.lock();
        let entry = state
            .holds
            .get_mut(&hold.id)
            .ok_or_else(|| ProcessorError::HoldNotFound(hold.id.clone()))?;
        if entry.captured.is_some() {
            return Err(ProcessorError::Rejected("hold already captured".into()));
        }
        entry.voided = true;
        Ok(())
    }

    async fn credit(
        &self,
        _bank_ref: &str,
        participant_id: &str,
        amount: Cents,
        reference: &str,
    ) -> ProcessorResult<TransactionOutcome> {
        let mut state = self.lock();
        if state.credit_transport_failure.contains(participant_id) {
            return Err(ProcessorError::Transport("connection reset".into()));
        }
        if state.decline_credit.contains(participant_id) {
            state.transactions.insert(
                reference.to_string(),
                ProcessorTransaction {
                    reference: reference.to_string(),
                    outcome: TransactionOutcome::Failed,
                    error: Some("bank account closed".into()),
                },
            );
            return Err(ProcessorError::Declined("bank account closed".into()));
        }
        let outcome = if state.credit_pending.contains(participant_id) {
            TransactionOutcome::Pending
        } else {
            TransactionOutcome::Succeeded
        };
        if outcome == TransactionOutcome::Succeeded {
            state.credited += amount.cents();
        }
        state.transactions.insert(
            reference.to_string(),
            ProcessorTransaction {
                reference: reference.to_string(),
                outcome,
                error: None,
            },
        );
        Ok(outcome)
    }

    async fn find_holds(&self, marker: &str) -> ProcessorResult<Vec<Hold>> {
        Ok(self
            .lock()
            .holds
            .values()
            .filter(|h| !h.voided && h.captured.is_none() && h.hold.marker == marker)
            .map(|h| h.hold.clone())
            .collect())
    }

    async fn find_transaction(
        &self,
        reference: &str,
    ) -> ProcessorResult<Option<ProcessorTransaction>> {
        Ok(self.lock().transactions.get(reference).cloned())
    }
}
