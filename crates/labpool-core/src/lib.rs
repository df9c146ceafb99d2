//! Allocation engine for labpoold
//!
//! The engine grants exclusive, time-boxed usage sessions on shared
//! resources, keeps a FIFO waiting queue per resource, auto-releases
//! expired sessions, and hands freed resources to the queue head.

mod engine;
mod ledger;
mod queue;
mod scheduler;

pub use engine::*;
pub use ledger::*;
pub use queue::*;
pub use scheduler::*;

use labpool_store::StoreError;
use labpool_util::PoolError;

pub(crate) fn store_error(e: StoreError) -> PoolError {
    PoolError::storage(e.to_string())
}
