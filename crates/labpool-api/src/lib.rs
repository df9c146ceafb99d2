//! Protocol types for labpoold IPC
//!
//! This crate defines the stable API between labpoold and clients:
//! - Commands (requests from clients, tagged with the caller's identity)
//! - Responses
//! - Events (service -> clients)
//! - Resource snapshots
//! - Versioning

mod commands;
mod events;
mod types;

pub use commands::*;
pub use events::*;
pub use types::*;

/// Current API version
pub const API_VERSION: u32 = 1;
