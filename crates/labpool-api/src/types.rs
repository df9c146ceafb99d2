//! Shared types for the labpoold API

use chrono::{DateTime, Utc};
use labpool_util::{Identity, ResourceId, UsageId};
use serde::{Deserialize, Serialize};

/// Kind of machine backing a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Windows,
    Ubuntu,
    Linux,
    MacOs,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Windows => "windows",
            ResourceKind::Ubuntu => "ubuntu",
            ResourceKind::Linux => "linux",
            ResourceKind::MacOs => "macos",
        }
    }
}

/// Occupancy state of a resource.
///
/// Maintenance is set by operators, not by the engine; the engine only
/// treats it as "not allocatable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Available,
    Occupied,
    Maintenance,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStatus::Available => "available",
            ResourceStatus::Occupied => "occupied",
            ResourceStatus::Maintenance => "maintenance",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "available" => Some(ResourceStatus::Available),
            "occupied" => Some(ResourceStatus::Occupied),
            "maintenance" => Some(ResourceStatus::Maintenance),
            _ => None,
        }
    }
}

impl ResourceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "windows" => Some(ResourceKind::Windows),
            "ubuntu" => Some(ResourceKind::Ubuntu),
            "linux" => Some(ResourceKind::Linux),
            "macos" => Some(ResourceKind::MacOs),
            _ => None,
        }
    }
}

/// Current occupant of a resource, as shown to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupantView {
    pub identity: Identity,
    pub usage_id: UsageId,
    pub started_at: DateTime<Utc>,
    pub remaining_seconds: u64,
    /// `remaining_seconds` rendered for status displays, e.g. "1h 5m 30s".
    pub remaining_display: String,
}

/// One waiting user in a resource's queue, in FIFO order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSlot {
    pub identity: Identity,
    pub requested_minutes: u32,
    /// `requested_minutes` rendered for status displays, e.g. "1h 30m".
    pub requested_display: String,
}

/// Point-in-time view of one resource for status displays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub resource_id: ResourceId,
    pub name: String,
    pub address: String,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    pub occupant: Option<OccupantView>,
    /// Active queue entries ordered by join time
    pub queue: Vec<QueueSlot>,
    /// Whether the requesting caller holds the current usage
    pub caller_is_occupant: bool,
    /// Whether the requesting caller has an active queue entry
    pub caller_in_queue: bool,
}

impl ResourceSnapshot {
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// Aggregate view across the whole pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub api_version: u32,
    pub resources: Vec<ResourceSnapshot>,
}

impl PoolSnapshot {
    pub fn available_count(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Available)
            .count()
    }

    pub fn occupied_count(&self) -> usize {
        self.resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Occupied)
            .count()
    }

    pub fn queue_total(&self) -> usize {
        self.resources.iter().map(|r| r.queue.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_as_str() {
        for status in [
            ResourceStatus::Available,
            ResourceStatus::Occupied,
            ResourceStatus::Maintenance,
        ] {
            assert_eq!(ResourceStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ResourceStatus::parse("broken"), None);
    }

    #[test]
    fn kind_roundtrips_as_str() {
        for kind in [
            ResourceKind::Windows,
            ResourceKind::Ubuntu,
            ResourceKind::Linux,
            ResourceKind::MacOs,
        ] {
            assert_eq!(ResourceKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn pool_snapshot_counts() {
        let snap = |status| ResourceSnapshot {
            resource_id: ResourceId::new("r"),
            name: "r".into(),
            address: "10.0.0.1".into(),
            kind: ResourceKind::Linux,
            status,
            occupant: None,
            queue: vec![],
            caller_is_occupant: false,
            caller_in_queue: false,
        };

        let pool = PoolSnapshot {
            api_version: crate::API_VERSION,
            resources: vec![
                snap(ResourceStatus::Available),
                snap(ResourceStatus::Occupied),
                snap(ResourceStatus::Occupied),
            ],
        };

        assert_eq!(pool.available_count(), 1);
        assert_eq!(pool.occupied_count(), 2);
        assert_eq!(pool.queue_total(), 0);
    }
}
