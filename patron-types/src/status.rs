//! Ledger status codes
//!
//! Stored as lowercase text in the ledger tables.

use serde::{Deserialize, Serialize};

/// Lifecycle of an exchange (money moving between Patron and the outside
/// world).
///
/// `Pre` is written before the external processor call so that a crash
/// between the write and the call's outcome can be reconciled later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeStatus {
    Pre,
    Succeeded,
    Failed,
    Pending,
}

impl ExchangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeStatus::Pre => "pre",
            ExchangeStatus::Succeeded => "succeeded",
            ExchangeStatus::Failed => "failed",
            ExchangeStatus::Pending => "pending",
        }
    }

    /// True once the processor's answer is final.
    pub fn is_final(&self) -> bool {
        matches!(self, ExchangeStatus::Succeeded | ExchangeStatus::Failed)
    }
}

impl std::fmt::Display for ExchangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ExchangeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre" => Ok(ExchangeStatus::Pre),
            "succeeded" => Ok(ExchangeStatus::Succeeded),
            "failed" => Ok(ExchangeStatus::Failed),
            "pending" => Ok(ExchangeStatus::Pending),
            _ => Err(format!("Unknown exchange status: {}", s)),
        }
    }
}

/// Why an internal transfer happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferContext {
    /// A recurring pledge from one participant to another
    Tip,
    /// A team member's share of team funds
    Take,
    /// Account consolidation performed by platform code
    Merge,
}

impl TransferContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferContext::Tip => "tip",
            TransferContext::Take => "take",
            TransferContext::Merge => "merge",
        }
    }
}

impl std::fmt::Display for TransferContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TransferContext {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tip" => Ok(TransferContext::Tip),
            "take" => Ok(TransferContext::Take),
            "merge" => Ok(TransferContext::Merge),
            _ => Err(format!("Unknown transfer context: {}", s)),
        }
    }
}
