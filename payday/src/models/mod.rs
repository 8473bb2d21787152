//! Ledger models
//!
//! One module per table. Each model carries its own query and mutation
//! helpers, taking `&mut SqliteConnection` so callers control transaction
//! boundaries.

pub mod exchange;
pub mod participant;
pub mod payday_run;
pub mod take;
pub mod tip;
pub mod transfer;

pub use exchange::{Exchange, NewExchange};
pub use participant::{NewParticipant, Participant};
pub use payday_run::PaydayRun;
pub use take::Take;
pub use tip::Tip;
pub use transfer::{NewTransfer, Transfer};
