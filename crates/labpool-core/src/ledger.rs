//! Usage ledger: open, close, and repair usage sessions

use crate::store_error;
use chrono::{DateTime, Utc};
use labpool_store::{Store, UsageRow};
use labpool_util::{Identity, PoolResult, ResourceId, UsageId};
use std::sync::Arc;
use tracing::warn;

/// Thin layer over the store for usage-session bookkeeping.
///
/// The authoritative occupant of a resource is its oldest open usage;
/// any younger open rows are duplicates to be repaired.
pub struct UsageLedger {
    store: Arc<dyn Store>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Open a new usage session starting now.
    pub fn open(
        &self,
        resource: &ResourceId,
        identity: &Identity,
        planned_minutes: u32,
        now: DateTime<Utc>,
    ) -> PoolResult<UsageRow> {
        let row = UsageRow {
            id: UsageId::new(),
            resource_id: resource.clone(),
            identity: identity.clone(),
            started_at: now,
            ended_at: None,
            planned_minutes,
            extended_minutes: 0,
            actual_seconds: None,
            auto_released: false,
        };
        self.store.insert_usage(&row).map_err(store_error)?;
        Ok(row)
    }

    /// The current occupant's usage, if any.
    pub fn current(&self, resource: &ResourceId) -> PoolResult<Option<UsageRow>> {
        self.store.open_usage_for(resource).map_err(store_error)
    }

    /// Close a usage. Returns the recorded held duration in seconds, or
    /// `None` if the usage was already closed (nothing written).
    pub fn close(
        &self,
        usage: &UsageRow,
        now: DateTime<Utc>,
        auto_released: bool,
    ) -> PoolResult<Option<i64>> {
        let actual = (now - usage.started_at).num_seconds().max(0);
        let closed = self
            .store
            .close_usage(&usage.id, now, actual, auto_released)
            .map_err(store_error)?;
        Ok(if closed { Some(actual) } else { None })
    }

    /// Add minutes to an open usage's allotted window.
    pub fn extend(&self, usage: &UsageId, minutes: u32) -> PoolResult<()> {
        self.store.add_extension(usage, minutes).map_err(store_error)
    }

    /// Force-close duplicate open usages, keeping the most recently
    /// started one. Closed duplicates get `ended_at` equal to their own
    /// `started_at`, so they count as zero-duration sessions.
    pub fn reconcile(&self, resource: &ResourceId) -> PoolResult<Vec<UsageRow>> {
        let open = self.store.open_usages_for(resource).map_err(store_error)?;
        if open.len() <= 1 {
            return Ok(Vec::new());
        }
        warn!(
            resource = %resource,
            open = open.len(),
            "Multiple open usages found, repairing"
        );
        let mut repaired = Vec::new();
        for dup in open.into_iter().skip(1) {
            self.store
                .close_usage(&dup.id, dup.started_at, 0, true)
                .map_err(store_error)?;
            repaired.push(dup);
        }
        Ok(repaired)
    }
}
