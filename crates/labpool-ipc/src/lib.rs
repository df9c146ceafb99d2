//! Unix socket IPC for labpoold
//!
//! Transport is newline-delimited JSON over a Unix domain socket.
//! Clients send [`labpool_api::Request`] lines and read
//! [`labpool_api::Response`] lines; subscribed clients additionally
//! receive [`labpool_api::Event`] lines interleaved with responses.

mod client;
mod server;

pub use client::*;
pub use server::*;

use thiserror::Error;

/// IPC errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Server error: {0}")]
    ServerError(String),
}

pub type IpcResult<T> = Result<T, IpcError>;
