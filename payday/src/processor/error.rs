//! Processor error types

use std::time::Duration;
use thiserror::Error;

/// Errors from the card/bank processor.
///
/// The split that matters for settlement is declined vs. unknown: a
/// decline is a definitive "no money moved", while a timeout or transport
/// failure leaves the outcome unknown and must be resolved by
/// reconciliation, never by guessing.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// The processor refused the operation (card declined, insufficient
    /// funds on the hold, closed bank account).
    #[error("declined: {0}")]
    Declined(String),

    /// The call did not complete within the configured timeout; the
    /// outcome is unknown.
    #[error("timeout: operation took longer than {0:?}")]
    Timeout(Duration),

    /// Network or protocol failure before a definitive answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The referenced hold does not exist on the processor.
    #[error("hold not found: {0}")]
    HoldNotFound(String),

    /// The participant's stored route is unusable.
    #[error("invalid route for participant {participant_id}: {reason}")]
    InvalidRoute {
        participant_id: String,
        reason: String,
    },

    /// The processor rejected the request as malformed or unauthorized.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ProcessorError {
    /// True if retrying later could succeed. Transient errors still leave
    /// the *outcome* of the attempted call unknown.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProcessorError::Timeout(_) | ProcessorError::Transport(_)
        )
    }

    /// True if the processor definitively refused and no money moved.
    pub fn is_decline(&self) -> bool {
        matches!(self, ProcessorError::Declined(_))
    }
}

pub type ProcessorResult<T> = Result<T, ProcessorError>;
