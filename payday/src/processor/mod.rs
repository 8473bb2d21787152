//! Card/bank processor interface
//!
//! The settlement engine talks to the processor through one small
//! capability trait per run: pre-authorize, capture, void, credit, and the
//! two lookup calls reconciliation needs. Every mutating call carries a
//! locally generated reference in its metadata so a crashed run can find
//! the call's true outcome later.
//!
//! One concrete implementation talks to the real processor over HTTPS
//! ([`RestProcessor`]); tests substitute their own.

pub mod error;
mod rest;

pub use error::{ProcessorError, ProcessorResult};
pub use rest::RestProcessor;

use async_trait::async_trait;
use patron_types::Cents;
use serde::{Deserialize, Serialize};

/// A card pre-authorization held on the processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    /// Processor-side hold id
    pub id: String,
    pub participant_id: String,
    /// Authorized total, including the upcharged fee
    pub amount: Cents,
    /// Run marker carried in the hold's metadata
    pub marker: String,
}

/// Final word from the processor about a debit or credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOutcome {
    Succeeded,
    Failed,
    Pending,
}

/// A processor-side transaction located by its metadata reference.
#[derive(Debug, Clone)]
pub struct ProcessorTransaction {
    pub reference: String,
    pub outcome: TransactionOutcome,
    pub error: Option<String>,
}

/// Capabilities the settlement engine needs from the processor.
///
/// Constructed once per run and passed into each component; there is no
/// shared global client.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Pre-authorize `amount` against a card route, tagging the hold with
    /// `marker` so an interrupted run can rediscover it.
    async fn create_hold(
        &self,
        card_ref: &str,
        participant_id: &str,
        amount: Cents,
        marker: &str,
    ) -> ProcessorResult<Hold>;

    /// Settle `amount` of the hold; the unconsumed remainder is released
    /// by the processor as part of the capture.
    async fn capture_hold(
        &self,
        hold: &Hold,
        amount: Cents,
        reference: &str,
    ) -> ProcessorResult<()>;

    /// Release an uncaptured hold in full.
    async fn void_hold(&self, hold: &Hold) -> ProcessorResult<()>;

    /// Push `amount` to a bank route. A `Pending` outcome means the
    /// processor accepted the credit but has not cleared it yet.
    async fn credit(
        &self,
        bank_ref: &str,
        participant_id: &str,
        amount: Cents,
        reference: &str,
    ) -> ProcessorResult<TransactionOutcome>;

    /// All live holds carrying `marker` — the crash-recovery path for an
    /// interrupted run's pre-authorizations.
    async fn find_holds(&self, marker: &str) -> ProcessorResult<Vec<Hold>>;

    /// Look up a past debit/credit by the reference we tagged it with.
    /// `None` means the processor has no record of the call at all.
    async fn find_transaction(
        &self,
        reference: &str,
    ) -> ProcessorResult<Option<ProcessorTransaction>>;
}
