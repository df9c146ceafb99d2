//! Command types for the labpoold protocol

use chrono::{DateTime, Utc};
use labpool_util::{Identity, ResourceId, UsageId};
use serde::{Deserialize, Serialize};

use crate::{PoolSnapshot, ResourceSnapshot, API_VERSION};

/// Request wrapper with metadata.
///
/// `identity` is the opaque authenticated identity supplied by the
/// caller's identity provider; labpoold treats it as established.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Authenticated identity of the caller
    pub identity: Identity,
    /// The command
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, identity: Identity, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            identity,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    /// API version
    pub api_version: u32,
    /// Response payload or error
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol, mirroring the engine's error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    NotFound,
    Conflict,
    Forbidden,
    Expired,
    NotQueued,
    NoActiveUsage,
    StorageError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Get a snapshot of one resource
    Status { resource_id: ResourceId },

    /// Get a snapshot of every active resource
    StatusAll,

    /// Occupy an available resource for the given number of minutes
    Occupy {
        resource_id: ResourceId,
        minutes: u32,
    },

    /// Release an occupied resource
    Release { resource_id: ResourceId },

    /// Join the waiting queue for a resource
    JoinQueue {
        resource_id: ResourceId,
        minutes: u32,
    },

    /// Leave the waiting queue for a resource
    LeaveQueue { resource_id: ResourceId },

    /// Extend the caller's current session
    Extend {
        resource_id: ResourceId,
        minutes: u32,
    },

    /// Force a pass of the expiry scanner
    RunExpiryScan,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Resource(ResourceSnapshot),
    Pool(PoolSnapshot),
    Occupied {
        usage_id: UsageId,
        ends_at: DateTime<Utc>,
    },
    Released {
        /// Identity promoted from the queue, if any
        promoted: Option<Identity>,
    },
    Queued {
        position: usize,
        estimated_wait_seconds: u64,
    },
    LeftQueue,
    Extended {
        remaining_seconds: u64,
    },
    ScanComplete {
        expired: usize,
    },
    Subscribed,
    Pong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serialization() {
        let req = Request::new(1, Identity::new("user1"), Command::StatusAll);
        let json = serde_json::to_string(&req).unwrap();
        let parsed: Request = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 1);
        assert_eq!(parsed.identity, Identity::new("user1"));
        assert!(matches!(parsed.command, Command::StatusAll));
    }

    #[test]
    fn response_serialization() {
        let resp = Response::success(
            7,
            ResponsePayload::Queued {
                position: 2,
                estimated_wait_seconds: 3590,
            },
        );

        let json = serde_json::to_string(&resp).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.request_id, 7);
        match parsed.result {
            ResponseResult::Ok(ResponsePayload::Queued { position, .. }) => {
                assert_eq!(position, 2)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn error_response_carries_code_and_message() {
        let resp = Response::error(3, ErrorInfo::new(ErrorCode::Conflict, "already in use"));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("conflict"));
        assert!(json.contains("already in use"));
    }
}
