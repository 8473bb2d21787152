//! Patron settlement engine
//!
//! Settles the internal ledger of recurring pledges ("tips") and team
//! revenue shares ("takes") into real money movement: card holds and
//! captures for participants giving more than they hold, bank credits for
//! participants owed money. The run is crash-resistant and idempotent —
//! a killed process resumes at its last unfinished stage, and
//! reconciliation squares the local ledger with the processor's record
//! before anything else moves.
//!
//! Entry point: [`services::Payday`]. The surrounding platform creates and
//! mutates participants, tips, and takes through ordinary CRUD; a
//! scheduler invokes one run per cycle and reads the run's counters back
//! for display.

pub mod config;
pub mod db;
pub mod models;
pub mod processor;
pub mod schema;
pub mod services;
pub mod telemetry;
