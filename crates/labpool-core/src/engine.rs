//! Allocation engine
//!
//! All checks and state transitions for a resource happen under that
//! resource's lock, so two callers can never both open a usage on the
//! same machine and no decision is made from a stale resource row.
//! Different resources proceed independently.

use crate::{store_error, QueueManager, UsageLedger};
use chrono::{DateTime, Utc};
use labpool_api::{OccupantView, PoolSnapshot, QueueSlot, ResourceKind, ResourceSnapshot, ResourceStatus, API_VERSION};
use labpool_store::{AuditEvent, AuditEventType, ResourceRow, Store, UsageRow};
use labpool_util::{format_duration, format_minutes, Clock, Identity, PoolError, PoolResult, ResourceId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// Session length defaults applied when a caller does not ask for a
/// specific duration.
#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub session_minutes: u32,
    pub extension_minutes: u32,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            session_minutes: 60,
            extension_minutes: 15,
        }
    }
}

/// A resource definition to seed into the pool at startup.
#[derive(Debug, Clone)]
pub struct ResourceSeed {
    pub id: ResourceId,
    pub name: String,
    pub address: String,
    pub kind: ResourceKind,
    pub maintenance: bool,
}

/// Result of a successful occupy.
#[derive(Debug, Clone)]
pub struct OccupyOutcome {
    pub usage: UsageRow,
    pub ends_at: DateTime<Utc>,
}

/// A queue head that was handed the freed resource.
#[derive(Debug, Clone)]
pub struct Promotion {
    pub identity: Identity,
    pub usage: UsageRow,
}

/// Result of closing a usage, by the occupant or by expiry.
#[derive(Debug, Clone)]
pub struct ReleaseOutcome {
    pub resource_id: ResourceId,
    pub closed: UsageRow,
    pub actual_seconds: i64,
    pub auto_released: bool,
    pub promoted: Option<Promotion>,
}

#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub position: usize,
    pub estimated_wait_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct ExtendOutcome {
    pub added_minutes: u32,
    pub remaining_seconds: u64,
}

/// The allocation engine. Safe to share behind an `Arc`; all methods
/// take `&self`.
pub struct AllocationEngine {
    store: Arc<dyn Store>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    ledger: UsageLedger,
    queue: QueueManager,
    locks: Mutex<HashMap<ResourceId, Arc<Mutex<()>>>>,
}

impl AllocationEngine {
    pub fn new(store: Arc<dyn Store>, clock: Arc<dyn Clock>, policy: SessionPolicy) -> Self {
        Self {
            ledger: UsageLedger::new(store.clone()),
            queue: QueueManager::new(store.clone()),
            store,
            clock,
            policy,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, resource: &ResourceId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(resource.clone()).or_default().clone()
    }

    /// Look up a resource; retired and unknown resources are equally
    /// invisible to callers.
    fn active_resource(&self, resource: &ResourceId) -> PoolResult<ResourceRow> {
        let row = self
            .store
            .get_resource(resource)
            .map_err(store_error)?
            .filter(|r| r.active)
            .ok_or_else(|| PoolError::NotFound(resource.clone()))?;
        Ok(row)
    }

    fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.store.append_audit(event) {
            warn!(error = %e, "Failed to write audit event");
        }
    }

    /// Seed a resource from config. Inserts it if unknown; otherwise
    /// only applies a maintenance-flag change. Returns true on insert.
    pub fn provision(&self, seed: &ResourceSeed) -> PoolResult<bool> {
        let now = self.clock.now();
        let lock = self.lock_for(&seed.id);
        let _guard = lock.lock().unwrap();

        if let Some(existing) = self.store.get_resource(&seed.id).map_err(store_error)? {
            let wanted = if seed.maintenance {
                ResourceStatus::Maintenance
            } else if existing.status == ResourceStatus::Maintenance {
                ResourceStatus::Available
            } else {
                existing.status
            };
            if wanted != existing.status {
                self.store
                    .set_resource_status(&seed.id, wanted, now)
                    .map_err(store_error)?;
                info!(resource = %seed.id, status = wanted.as_str(), "Maintenance flag applied");
            }
            if !existing.active {
                self.store
                    .set_resource_active(&seed.id, true, now)
                    .map_err(store_error)?;
            }
            return Ok(false);
        }

        let row = ResourceRow {
            id: seed.id.clone(),
            name: seed.name.clone(),
            address: seed.address.clone(),
            kind: seed.kind,
            status: if seed.maintenance {
                ResourceStatus::Maintenance
            } else {
                ResourceStatus::Available
            },
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_resource(&row).map_err(store_error)?;
        info!(resource = %seed.id, name = %seed.name, "Resource provisioned");
        self.audit(
            AuditEvent::new(
                now,
                AuditEventType::ResourceProvisioned {
                    name: seed.name.clone(),
                    address: seed.address.clone(),
                },
            )
            .with_resource(seed.id.clone()),
        );
        Ok(true)
    }

    /// Retire a resource: hide it and drop its usages and queue.
    pub fn retire(&self, resource: &ResourceId) -> PoolResult<()> {
        let now = self.clock.now();
        let lock = self.lock_for(resource);
        let _guard = lock.lock().unwrap();

        self.active_resource(resource)?;
        self.store
            .set_resource_active(resource, false, now)
            .map_err(store_error)?;
        self.store
            .delete_resource_dependents(resource)
            .map_err(store_error)?;
        info!(resource = %resource, "Resource retired");
        Ok(())
    }

    /// Take exclusive use of a free resource for `minutes` (policy
    /// default when `None`).
    pub fn occupy(
        &self,
        identity: &Identity,
        resource: &ResourceId,
        minutes: Option<u32>,
    ) -> PoolResult<OccupyOutcome> {
        let minutes = minutes.unwrap_or(self.policy.session_minutes);
        if minutes == 0 {
            return Err(PoolError::conflict("requested minutes must be greater than zero"));
        }

        let now = self.clock.now();
        let lock = self.lock_for(resource);
        let _guard = lock.lock().unwrap();

        let row = self.active_resource(resource)?;
        if row.status == ResourceStatus::Maintenance {
            return Err(PoolError::conflict("resource is under maintenance"));
        }
        if let Some(current) = self.ledger.current(resource)? {
            return Err(PoolError::Conflict(format!(
                "resource is occupied by {}",
                current.identity
            )));
        }

        let usage = self.ledger.open(resource, identity, minutes, now)?;
        self.store
            .set_resource_status(resource, ResourceStatus::Occupied, now)
            .map_err(store_error)?;

        // Taking the machine satisfies any queue entry the caller held.
        match self.queue.leave(resource, identity) {
            Ok(_) | Err(PoolError::NotQueued) => {}
            Err(e) => return Err(e),
        }

        info!(resource = %resource, identity = %identity, minutes, "Resource occupied");
        self.audit(
            AuditEvent::new(
                now,
                AuditEventType::Occupied {
                    usage_id: usage.id.clone(),
                    minutes,
                },
            )
            .with_actor(identity.clone())
            .with_resource(resource.clone()),
        );

        Ok(OccupyOutcome {
            ends_at: usage.ends_at(),
            usage,
        })
    }

    /// Release a resource held by the caller. The queue head, if any,
    /// is promoted in the same step.
    pub fn release(&self, identity: &Identity, resource: &ResourceId) -> PoolResult<ReleaseOutcome> {
        let now = self.clock.now();
        let lock = self.lock_for(resource);
        let _guard = lock.lock().unwrap();
        self.active_resource(resource)?;

        let current = self
            .ledger
            .current(resource)?
            .ok_or(PoolError::NoActiveUsage)?;
        if current.identity != *identity {
            return Err(PoolError::Forbidden(format!(
                "resource is held by {}",
                current.identity
            )));
        }

        let actual_seconds = self
            .ledger
            .close(&current, now, false)?
            .unwrap_or(0);
        self.audit(
            AuditEvent::new(
                now,
                AuditEventType::Released {
                    usage_id: current.id.clone(),
                    actual_seconds,
                },
            )
            .with_actor(identity.clone())
            .with_resource(resource.clone()),
        );

        let promoted = self.promote_locked(resource, now)?;
        info!(
            resource = %resource,
            identity = %identity,
            held_seconds = actual_seconds,
            promoted = promoted.is_some(),
            "Resource released"
        );

        Ok(ReleaseOutcome {
            resource_id: resource.clone(),
            closed: current,
            actual_seconds,
            auto_released: false,
            promoted,
        })
    }

    /// Close the current usage if its window has run out. Idempotent;
    /// returns `None` when there is nothing to expire.
    pub fn expire_if_due(&self, resource: &ResourceId) -> PoolResult<Option<ReleaseOutcome>> {
        let now = self.clock.now();
        let lock = self.lock_for(resource);
        let _guard = lock.lock().unwrap();
        self.expire_locked(resource, now)
    }

    fn expire_locked(
        &self,
        resource: &ResourceId,
        now: DateTime<Utc>,
    ) -> PoolResult<Option<ReleaseOutcome>> {
        let current = match self.ledger.current(resource)? {
            Some(usage) => usage,
            None => return Ok(None),
        };
        if !current.is_expired(now) {
            return Ok(None);
        }

        let actual_seconds = match self.ledger.close(&current, now, true)? {
            Some(actual) => actual,
            // Lost the race against another closer; nothing to report.
            None => return Ok(None),
        };
        self.audit(
            AuditEvent::new(
                now,
                AuditEventType::AutoReleased {
                    usage_id: current.id.clone(),
                    actual_seconds,
                },
            )
            .with_actor(current.identity.clone())
            .with_resource(resource.clone()),
        );

        let promoted = self.promote_locked(resource, now)?;
        info!(
            resource = %resource,
            identity = %current.identity,
            promoted = promoted.is_some(),
            "Expired session auto-released"
        );

        Ok(Some(ReleaseOutcome {
            resource_id: resource.clone(),
            closed: current,
            actual_seconds,
            auto_released: true,
            promoted,
        }))
    }

    /// Hand a freed resource to the queue head, or mark it available.
    /// Caller must hold the resource lock.
    fn promote_locked(
        &self,
        resource: &ResourceId,
        now: DateTime<Utc>,
    ) -> PoolResult<Option<Promotion>> {
        let head = match self.queue.take_head(resource)? {
            Some(entry) => entry,
            None => {
                self.store
                    .set_resource_status(resource, ResourceStatus::Available, now)
                    .map_err(store_error)?;
                return Ok(None);
            }
        };

        // Requested minutes only drive the wait estimate; a promoted
        // session always opens with the default window.
        let minutes = self.policy.session_minutes;
        let usage = self.ledger.open(resource, &head.identity, minutes, now)?;
        self.store
            .set_resource_status(resource, ResourceStatus::Occupied, now)
            .map_err(store_error)?;
        self.queue
            .refresh_estimates(resource, usage.remaining_seconds(now))?;

        info!(resource = %resource, identity = %head.identity, minutes, "Queue head promoted");
        self.audit(
            AuditEvent::new(
                now,
                AuditEventType::QueuePromoted {
                    usage_id: usage.id.clone(),
                    planned_minutes: minutes,
                },
            )
            .with_actor(head.identity.clone())
            .with_resource(resource.clone()),
        );

        Ok(Some(Promotion {
            identity: head.identity,
            usage,
        }))
    }

    /// Join a resource's waiting queue.
    pub fn join_queue(
        &self,
        identity: &Identity,
        resource: &ResourceId,
        minutes: Option<u32>,
    ) -> PoolResult<JoinOutcome> {
        let minutes = minutes.unwrap_or(self.policy.session_minutes);
        if minutes == 0 {
            return Err(PoolError::conflict("requested minutes must be greater than zero"));
        }

        let now = self.clock.now();
        let lock = self.lock_for(resource);
        let _guard = lock.lock().unwrap();
        self.active_resource(resource)?;

        let current = self.ledger.current(resource)?;
        if let Some(usage) = &current {
            if usage.identity == *identity {
                return Err(PoolError::conflict("already occupying this resource"));
            }
        }
        let occupant_remaining = current
            .map(|u| u.remaining_seconds(now))
            .unwrap_or(0);

        let (_, position, estimate) =
            self.queue
                .join(resource, identity, minutes, occupant_remaining, now)?;

        info!(
            resource = %resource,
            identity = %identity,
            position,
            estimated_wait_seconds = estimate,
            "Joined queue"
        );
        self.audit(
            AuditEvent::new(
                now,
                AuditEventType::QueueJoined {
                    requested_minutes: minutes,
                    position,
                },
            )
            .with_actor(identity.clone())
            .with_resource(resource.clone()),
        );

        Ok(JoinOutcome {
            position,
            estimated_wait_seconds: estimate,
        })
    }

    /// Leave a resource's waiting queue.
    pub fn leave_queue(&self, identity: &Identity, resource: &ResourceId) -> PoolResult<()> {
        let now = self.clock.now();
        let lock = self.lock_for(resource);
        let _guard = lock.lock().unwrap();
        self.active_resource(resource)?;

        self.queue.leave(resource, identity)?;
        info!(resource = %resource, identity = %identity, "Left queue");
        self.audit(
            AuditEvent::new(now, AuditEventType::QueueLeft)
                .with_actor(identity.clone())
                .with_resource(resource.clone()),
        );
        Ok(())
    }

    /// Extend the caller's current session. Waiting users' estimates
    /// grow by the same amount.
    pub fn extend(
        &self,
        identity: &Identity,
        resource: &ResourceId,
        minutes: Option<u32>,
    ) -> PoolResult<ExtendOutcome> {
        let minutes = minutes.unwrap_or(self.policy.extension_minutes);
        if minutes == 0 {
            return Err(PoolError::conflict("extension minutes must be greater than zero"));
        }

        let now = self.clock.now();
        let lock = self.lock_for(resource);
        let _guard = lock.lock().unwrap();
        self.active_resource(resource)?;

        let current = self
            .ledger
            .current(resource)?
            .ok_or(PoolError::NoActiveUsage)?;
        if current.identity != *identity {
            return Err(PoolError::Forbidden(format!(
                "resource is held by {}",
                current.identity
            )));
        }
        if current.is_expired(now) {
            return Err(PoolError::Expired);
        }

        self.ledger.extend(&current.id, minutes)?;
        self.queue.bump(resource, u64::from(minutes) * 60)?;

        let remaining = current.remaining_seconds(now) + u64::from(minutes) * 60;
        info!(
            resource = %resource,
            identity = %identity,
            minutes,
            remaining_seconds = remaining,
            "Session extended"
        );
        self.audit(
            AuditEvent::new(
                now,
                AuditEventType::TimeExtended {
                    added_minutes: minutes,
                    remaining_seconds: remaining,
                },
            )
            .with_actor(identity.clone())
            .with_resource(resource.clone()),
        );

        Ok(ExtendOutcome {
            added_minutes: minutes,
            remaining_seconds: remaining,
        })
    }

    /// Point-in-time view of one resource. An expired session found
    /// here is closed first; the outcome is returned alongside the
    /// snapshot so callers can announce it.
    pub fn status(
        &self,
        caller: &Identity,
        resource: &ResourceId,
    ) -> PoolResult<(ResourceSnapshot, Option<ReleaseOutcome>)> {
        let now = self.clock.now();
        let lock = self.lock_for(resource);
        let _guard = lock.lock().unwrap();

        let row = self.active_resource(resource)?;
        let expired = self.expire_locked(resource, now)?;
        let snapshot = self.snapshot_locked(&row, caller, now)?;
        Ok((snapshot, expired))
    }

    /// Snapshot of every active resource, expiring stale sessions along
    /// the way.
    pub fn status_all(
        &self,
        caller: &Identity,
    ) -> PoolResult<(PoolSnapshot, Vec<ReleaseOutcome>)> {
        let now = self.clock.now();
        let mut snapshots = Vec::new();
        let mut expired = Vec::new();

        for listed in self.store.list_resources().map_err(store_error)? {
            let lock = self.lock_for(&listed.id);
            let _guard = lock.lock().unwrap();
            // Re-read under the lock: the listing may be stale by now.
            let row = match self.store.get_resource(&listed.id).map_err(store_error)? {
                Some(row) if row.active => row,
                _ => continue,
            };
            if let Some(outcome) = self.expire_locked(&row.id, now)? {
                expired.push(outcome);
            }
            snapshots.push(self.snapshot_locked(&row, caller, now)?);
        }

        Ok((
            PoolSnapshot {
                api_version: API_VERSION,
                resources: snapshots,
            },
            expired,
        ))
    }

    /// Caller must hold the resource lock.
    fn snapshot_locked(
        &self,
        row: &ResourceRow,
        caller: &Identity,
        now: DateTime<Utc>,
    ) -> PoolResult<ResourceSnapshot> {
        let current = self.ledger.current(&row.id)?;
        let queue = self.queue.entries(&row.id)?;

        let status = if row.status == ResourceStatus::Maintenance {
            ResourceStatus::Maintenance
        } else if current.is_some() {
            ResourceStatus::Occupied
        } else {
            ResourceStatus::Available
        };

        let caller_is_occupant = current
            .as_ref()
            .map(|u| u.identity == *caller)
            .unwrap_or(false);
        let caller_in_queue = queue.iter().any(|e| e.identity == *caller);

        Ok(ResourceSnapshot {
            resource_id: row.id.clone(),
            name: row.name.clone(),
            address: row.address.clone(),
            kind: row.kind,
            status,
            occupant: current.map(|u| {
                let remaining = u.remaining_seconds(now);
                OccupantView {
                    identity: u.identity.clone(),
                    usage_id: u.id.clone(),
                    started_at: u.started_at,
                    remaining_seconds: remaining,
                    remaining_display: format_duration(Duration::from_secs(remaining)),
                }
            }),
            queue: queue
                .into_iter()
                .map(|e| QueueSlot {
                    identity: e.identity,
                    requested_minutes: e.requested_minutes,
                    requested_display: format_minutes(e.requested_minutes),
                })
                .collect(),
            caller_is_occupant,
            caller_in_queue,
        })
    }

    /// Sweep every resource for run-out sessions. A failure on one
    /// resource does not stop the sweep.
    pub fn run_expiry_scan(&self) -> PoolResult<Vec<ReleaseOutcome>> {
        let mut outcomes = Vec::new();
        for row in self.store.list_resources().map_err(store_error)? {
            match self.expire_if_due(&row.id) {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => {
                    warn!(resource = %row.id, error = %e, "Expiry check failed, continuing scan");
                }
            }
        }
        Ok(outcomes)
    }

    /// Startup repair pass: force-close duplicate open usages and bring
    /// each resource's status flag back in line with its ledger.
    pub fn reconcile(&self) -> PoolResult<usize> {
        let now = self.clock.now();
        let mut repaired = 0;

        for row in self.store.list_resources().map_err(store_error)? {
            let lock = self.lock_for(&row.id);
            let _guard = lock.lock().unwrap();

            for dup in self.ledger.reconcile(&row.id)? {
                warn!(resource = %row.id, usage = %dup.id, identity = %dup.identity, "Duplicate open usage repaired");
                self.audit(
                    AuditEvent::new(now, AuditEventType::DuplicateUsageRepaired { usage_id: dup.id })
                        .with_actor(dup.identity)
                        .with_resource(row.id.clone()),
                );
                repaired += 1;
            }

            if row.status != ResourceStatus::Maintenance {
                let wanted = if self.ledger.current(&row.id)?.is_some() {
                    ResourceStatus::Occupied
                } else {
                    ResourceStatus::Available
                };
                if wanted != row.status {
                    self.store
                        .set_resource_status(&row.id, wanted, now)
                        .map_err(store_error)?;
                }
            }
        }

        Ok(repaired)
    }

    pub fn is_healthy(&self) -> bool {
        self.store.is_healthy()
    }
}
