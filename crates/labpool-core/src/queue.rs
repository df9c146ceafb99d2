//! Per-resource FIFO waiting queues

use crate::store_error;
use chrono::{DateTime, Utc};
use labpool_store::{QueueRow, Store};
use labpool_util::{Identity, PoolError, PoolResult, ResourceId};
use std::sync::Arc;

/// Manages the waiting queues. Ordering is join time; wait estimates
/// are display-only caches and never affect ordering.
pub struct QueueManager {
    store: Arc<dyn Store>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append the caller to a resource's queue.
    ///
    /// The wait estimate is the occupant's remaining seconds plus the
    /// requested minutes of everyone already waiting. Returns the new
    /// entry's ID, its 1-based position, and the estimate.
    pub fn join(
        &self,
        resource: &ResourceId,
        identity: &Identity,
        requested_minutes: u32,
        occupant_remaining_seconds: u64,
        now: DateTime<Utc>,
    ) -> PoolResult<(i64, usize, u64)> {
        if self
            .store
            .active_queue_entry(resource, identity)
            .map_err(store_error)?
            .is_some()
        {
            return Err(PoolError::conflict("already waiting in this queue"));
        }
        // Clear dead rows so the unique (resource, identity) slot is free.
        self.store
            .purge_inactive_entries(resource, identity)
            .map_err(store_error)?;

        let ahead = self.store.active_queue(resource).map_err(store_error)?;
        let estimate = occupant_remaining_seconds
            + ahead
                .iter()
                .map(|e| u64::from(e.requested_minutes) * 60)
                .sum::<u64>();

        let row = QueueRow {
            id: 0,
            resource_id: resource.clone(),
            identity: identity.clone(),
            joined_at: now,
            requested_minutes,
            estimated_wait_seconds: estimate,
            active: true,
        };
        let entry_id = self.store.insert_queue_entry(&row).map_err(store_error)?;
        Ok((entry_id, ahead.len() + 1, estimate))
    }

    /// Remove the caller's active entry. Fails with `NotQueued` if there
    /// is none.
    pub fn leave(&self, resource: &ResourceId, identity: &Identity) -> PoolResult<QueueRow> {
        let entry = self
            .store
            .active_queue_entry(resource, identity)
            .map_err(store_error)?
            .ok_or(PoolError::NotQueued)?;
        self.store
            .deactivate_queue_entry(entry.id)
            .map_err(store_error)?;
        Ok(entry)
    }

    /// Active entries in FIFO order.
    pub fn entries(&self, resource: &ResourceId) -> PoolResult<Vec<QueueRow>> {
        self.store.active_queue(resource).map_err(store_error)
    }

    pub fn entry_for(
        &self,
        resource: &ResourceId,
        identity: &Identity,
    ) -> PoolResult<Option<QueueRow>> {
        self.store
            .active_queue_entry(resource, identity)
            .map_err(store_error)
    }

    /// Pop the queue head, deactivating its entry.
    pub fn take_head(&self, resource: &ResourceId) -> PoolResult<Option<QueueRow>> {
        let head = match self
            .store
            .active_queue(resource)
            .map_err(store_error)?
            .into_iter()
            .next()
        {
            Some(entry) => entry,
            None => return Ok(None),
        };
        self.store
            .deactivate_queue_entry(head.id)
            .map_err(store_error)?;
        Ok(Some(head))
    }

    /// Add seconds to every waiting entry's estimate, used when the
    /// occupant extends their session.
    pub fn bump(&self, resource: &ResourceId, add_seconds: u64) -> PoolResult<usize> {
        self.store
            .bump_estimates(resource, add_seconds)
            .map_err(store_error)
    }

    /// Recompute estimates front to back from the new occupant's
    /// remaining time, used after a promotion.
    pub fn refresh_estimates(
        &self,
        resource: &ResourceId,
        occupant_remaining_seconds: u64,
    ) -> PoolResult<()> {
        let mut running = occupant_remaining_seconds;
        for entry in self.store.active_queue(resource).map_err(store_error)? {
            self.store
                .set_estimated_wait(entry.id, running)
                .map_err(store_error)?;
            running += u64::from(entry.requested_minutes) * 60;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use labpool_store::SqliteStore;

    fn setup() -> (QueueManager, DateTime<Utc>) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        (QueueManager::new(store), t0)
    }

    #[test]
    fn join_estimates_stack_up() {
        let (queue, t0) = setup();
        let rid = ResourceId::new("win-101");

        // Occupant has 20 minutes left; first joiner waits just that.
        let (_, pos, est) = queue
            .join(&rid, &Identity::new("a"), 30, 20 * 60, t0)
            .unwrap();
        assert_eq!(pos, 1);
        assert_eq!(est, 20 * 60);

        // Second joiner also waits for a's requested 30 minutes.
        let (_, pos, est) = queue
            .join(&rid, &Identity::new("b"), 45, 20 * 60, t0 + Duration::seconds(5))
            .unwrap();
        assert_eq!(pos, 2);
        assert_eq!(est, 20 * 60 + 30 * 60);
    }

    #[test]
    fn duplicate_join_rejected() {
        let (queue, t0) = setup();
        let rid = ResourceId::new("win-101");
        let user = Identity::new("a");

        queue.join(&rid, &user, 30, 0, t0).unwrap();
        let err = queue.join(&rid, &user, 30, 0, t0).unwrap_err();
        assert!(matches!(err, PoolError::Conflict(_)));
    }

    #[test]
    fn leave_then_rejoin_works() {
        let (queue, t0) = setup();
        let rid = ResourceId::new("win-101");
        let user = Identity::new("a");

        queue.join(&rid, &user, 30, 0, t0).unwrap();
        assert!(queue.entry_for(&rid, &user).unwrap().is_some());
        queue.leave(&rid, &user).unwrap();
        assert!(queue.entry_for(&rid, &user).unwrap().is_none());
        assert!(matches!(
            queue.leave(&rid, &user).unwrap_err(),
            PoolError::NotQueued
        ));

        let (_, pos, _) = queue
            .join(&rid, &user, 30, 0, t0 + Duration::seconds(10))
            .unwrap();
        assert_eq!(pos, 1);
    }

    #[test]
    fn take_head_is_fifo() {
        let (queue, t0) = setup();
        let rid = ResourceId::new("win-101");
        queue.join(&rid, &Identity::new("a"), 30, 0, t0).unwrap();
        queue
            .join(&rid, &Identity::new("b"), 30, 0, t0 + Duration::seconds(1))
            .unwrap();

        let head = queue.take_head(&rid).unwrap().unwrap();
        assert_eq!(head.identity.as_str(), "a");
        let head = queue.take_head(&rid).unwrap().unwrap();
        assert_eq!(head.identity.as_str(), "b");
        assert!(queue.take_head(&rid).unwrap().is_none());
    }

    #[test]
    fn refresh_recomputes_front_to_back() {
        let (queue, t0) = setup();
        let rid = ResourceId::new("win-101");
        queue.join(&rid, &Identity::new("a"), 30, 600, t0).unwrap();
        queue
            .join(&rid, &Identity::new("b"), 45, 600, t0 + Duration::seconds(1))
            .unwrap();

        // New occupant has 15 minutes.
        queue.refresh_estimates(&rid, 15 * 60).unwrap();
        let entries = queue.entries(&rid).unwrap();
        assert_eq!(entries[0].estimated_wait_seconds, 15 * 60);
        assert_eq!(entries[1].estimated_wait_seconds, 15 * 60 + 30 * 60);
    }
}
