//! Shared utilities for labpoold
//!
//! This crate provides:
//! - ID types (ResourceId, UsageId, Identity, ClientId)
//! - The Clock time source abstraction
//! - Error taxonomy for engine operations
//! - Default paths for socket and data directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;
