//! Settlement services
//!
//! The run pipeline, in execution order: reconcile, snapshot, holds,
//! transfers, holds (capture), commit, payouts. `payday` is the
//! orchestrator that owns the stage counter and sequences the rest.

pub mod commit;
pub mod holds;
pub mod payday;
pub mod payouts;
pub mod reconcile;
pub mod snapshot;
pub mod transfers;

pub use payday::{Payday, RunSummary};
