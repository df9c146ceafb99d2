//! Store trait and row types

use crate::{AuditEvent, StoreResult};
use chrono::{DateTime, Duration, Utc};
use labpool_api::{ResourceKind, ResourceStatus};
use labpool_util::{Identity, ResourceId, UsageId};

/// A shared machine known to the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRow {
    pub id: ResourceId,
    pub name: String,
    pub address: String,
    pub kind: ResourceKind,
    pub status: ResourceStatus,
    /// Inactive resources are retired: hidden from status and refused for occupy.
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One exclusive usage session of a resource.
///
/// A usage is "open" while `ended_at` is NULL. The allotted window is
/// `planned_minutes + extended_minutes` counted from `started_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageRow {
    pub id: UsageId,
    pub resource_id: ResourceId,
    pub identity: Identity,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub planned_minutes: u32,
    pub extended_minutes: u32,
    /// Wall-clock seconds actually held, recorded at close.
    pub actual_seconds: Option<i64>,
    /// Closed by the expiry scan rather than the occupant.
    pub auto_released: bool,
}

impl UsageRow {
    /// When the allotted window ends, including extensions.
    pub fn ends_at(&self) -> DateTime<Utc> {
        let total = i64::from(self.planned_minutes) + i64::from(self.extended_minutes);
        self.started_at + Duration::minutes(total)
    }

    /// Seconds left in the allotted window, clamped to zero.
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> u64 {
        if self.ended_at.is_some() {
            return 0;
        }
        let left = (self.ends_at() - now).num_seconds();
        if left > 0 {
            left as u64
        } else {
            0
        }
    }

    /// True if the usage is open and its window has run out.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.ended_at.is_none() && now >= self.ends_at()
    }
}

/// One waiting entry in a resource's FIFO queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRow {
    /// Assigned by the store on insert.
    pub id: i64,
    pub resource_id: ResourceId,
    pub identity: Identity,
    pub joined_at: DateTime<Utc>,
    pub requested_minutes: u32,
    /// Display-only estimate, refreshed on join and bumped on extension.
    pub estimated_wait_seconds: u64,
    pub active: bool,
}

/// Storage backend for resources, usages, queues, and the audit log.
pub trait Store: Send + Sync {
    // Resources

    fn insert_resource(&self, row: &ResourceRow) -> StoreResult<()>;

    fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<ResourceRow>>;

    /// Active resources, ordered by name.
    fn list_resources(&self) -> StoreResult<Vec<ResourceRow>>;

    fn set_resource_status(
        &self,
        id: &ResourceId,
        status: ResourceStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    fn set_resource_active(
        &self,
        id: &ResourceId,
        active: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Remove a retired resource's usages and queue entries.
    fn delete_resource_dependents(&self, id: &ResourceId) -> StoreResult<()>;

    // Usages

    fn insert_usage(&self, row: &UsageRow) -> StoreResult<()>;

    fn get_usage(&self, id: &UsageId) -> StoreResult<Option<UsageRow>>;

    /// The authoritative open usage for a resource: oldest `started_at` first.
    fn open_usage_for(&self, resource: &ResourceId) -> StoreResult<Option<UsageRow>>;

    /// All open usages for a resource, newest `started_at` first.
    /// More than one row means the ledger needs repair.
    fn open_usages_for(&self, resource: &ResourceId) -> StoreResult<Vec<UsageRow>>;

    /// Close an open usage. Returns false if it was already closed,
    /// in which case nothing is written.
    fn close_usage(
        &self,
        id: &UsageId,
        ended_at: DateTime<Utc>,
        actual_seconds: i64,
        auto_released: bool,
    ) -> StoreResult<bool>;

    fn add_extension(&self, id: &UsageId, minutes: u32) -> StoreResult<()>;

    // Queues

    /// Insert a queue entry and return its assigned ID.
    fn insert_queue_entry(&self, row: &QueueRow) -> StoreResult<i64>;

    /// Active entries for a resource in FIFO order (oldest `joined_at` first).
    fn active_queue(&self, resource: &ResourceId) -> StoreResult<Vec<QueueRow>>;

    fn active_queue_entry(
        &self,
        resource: &ResourceId,
        identity: &Identity,
    ) -> StoreResult<Option<QueueRow>>;

    fn deactivate_queue_entry(&self, entry_id: i64) -> StoreResult<()>;

    /// Delete leftover inactive rows for this (resource, identity) pair so a
    /// fresh entry can be inserted. Returns the number of rows removed.
    fn purge_inactive_entries(
        &self,
        resource: &ResourceId,
        identity: &Identity,
    ) -> StoreResult<usize>;

    fn set_estimated_wait(&self, entry_id: i64, seconds: u64) -> StoreResult<()>;

    /// Add seconds to every active entry's estimate for a resource.
    /// Returns the number of entries updated.
    fn bump_estimates(&self, resource: &ResourceId, add_seconds: u64) -> StoreResult<usize>;

    // Audit

    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    fn is_healthy(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn usage(planned: u32, extended: u32) -> UsageRow {
        UsageRow {
            id: UsageId::new(),
            resource_id: ResourceId::new("win-101"),
            identity: Identity::new("user1"),
            started_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            ended_at: None,
            planned_minutes: planned,
            extended_minutes: extended,
            actual_seconds: None,
            auto_released: false,
        }
    }

    #[test]
    fn remaining_counts_down_and_clamps() {
        let u = usage(60, 0);
        let mid = u.started_at + Duration::minutes(45);
        assert_eq!(u.remaining_seconds(mid), 15 * 60);

        let past = u.started_at + Duration::minutes(90);
        assert_eq!(u.remaining_seconds(past), 0);
        assert!(u.is_expired(past));
    }

    #[test]
    fn extension_pushes_ends_at() {
        let u = usage(60, 15);
        assert_eq!(u.ends_at(), u.started_at + Duration::minutes(75));
        assert!(!u.is_expired(u.started_at + Duration::minutes(70)));
    }

    #[test]
    fn closed_usage_has_no_remaining_time() {
        let mut u = usage(60, 0);
        u.ended_at = Some(u.started_at + Duration::minutes(10));
        assert_eq!(u.remaining_seconds(u.started_at), 0);
        assert!(!u.is_expired(u.started_at + Duration::hours(2)));
    }
}
