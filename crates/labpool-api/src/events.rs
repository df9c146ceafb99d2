//! Event types for labpoold -> client streaming

use chrono::{DateTime, Utc};
use labpool_util::{Identity, ResourceId, UsageId};
use serde::{Deserialize, Serialize};

use crate::API_VERSION;

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(timestamp: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp,
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A resource was occupied
    ResourceOccupied {
        resource_id: ResourceId,
        identity: Identity,
        usage_id: UsageId,
        ends_at: DateTime<Utc>,
    },

    /// A resource was released by its occupant
    ResourceReleased {
        resource_id: ResourceId,
        identity: Identity,
    },

    /// A session expired and was closed by the scanner
    SessionExpired {
        resource_id: ResourceId,
        identity: Identity,
        usage_id: UsageId,
    },

    /// The head of the queue was handed the resource
    QueuePromoted {
        resource_id: ResourceId,
        identity: Identity,
        usage_id: UsageId,
        ends_at: DateTime<Utc>,
    },

    /// Someone joined a resource's queue
    QueueJoined {
        resource_id: ResourceId,
        identity: Identity,
        position: usize,
    },

    /// Someone left a resource's queue
    QueueLeft {
        resource_id: ResourceId,
        identity: Identity,
    },

    /// A session was extended
    TimeExtended {
        resource_id: ResourceId,
        identity: Identity,
        added_minutes: u32,
        remaining_seconds: u64,
    },

    /// Service is shutting down
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn event_serialization() {
        let event = Event::new(
            Utc::now(),
            EventPayload::QueueJoined {
                resource_id: ResourceId::new("ubuntu-240"),
                identity: Identity::new("user2"),
                position: 1,
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.api_version, API_VERSION);
        assert!(matches!(parsed.payload, EventPayload::QueueJoined { position: 1, .. }));
    }
}
