//! Audit event types

use chrono::{DateTime, Utc};
use labpool_util::{Identity, ResourceId, UsageId};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Resource provisioned from config
    ResourceProvisioned { name: String, address: String },

    /// Resource occupied
    Occupied { usage_id: UsageId, minutes: u32 },

    /// Resource released by its occupant
    Released {
        usage_id: UsageId,
        actual_seconds: i64,
    },

    /// Session expired and was auto-released
    AutoReleased {
        usage_id: UsageId,
        actual_seconds: i64,
    },

    /// Head of the queue handed the resource
    QueuePromoted {
        usage_id: UsageId,
        planned_minutes: u32,
    },

    /// User joined a queue
    QueueJoined {
        requested_minutes: u32,
        position: usize,
    },

    /// User left a queue
    QueueLeft,

    /// Session extended
    TimeExtended {
        added_minutes: u32,
        remaining_seconds: u64,
    },

    /// Duplicate open usage force-closed by reconciliation
    DuplicateUsageRepaired { usage_id: UsageId },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID (assigned by the store)
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Acting identity, if the event was user-driven
    pub actor: Option<Identity>,

    /// Resource involved, if any
    pub resource: Option<ResourceId>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(timestamp: DateTime<Utc>, event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            actor: None,
            resource: None,
            event,
        }
    }

    pub fn with_actor(mut self, actor: Identity) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_resource(mut self, resource: ResourceId) -> Self {
        self.resource = Some(resource);
        self
    }
}
