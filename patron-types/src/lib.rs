//! Patron Shared Types
//!
//! This crate provides types shared between the Patron settlement engine
//! and the surrounding platform code:
//! - `Cents`: integer money amounts used throughout the ledger
//! - `ExchangeStatus` / `TransferContext`: ledger status codes stored as text

pub mod currency;
pub mod status;

pub use currency::*;
pub use status::*;
