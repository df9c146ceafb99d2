//! SQLite-backed store

use crate::{AuditEvent, QueueRow, ResourceRow, Store, StoreError, StoreResult, UsageRow};
use chrono::{DateTime, SecondsFormat, Utc};
use labpool_api::{ResourceKind, ResourceStatus};
use labpool_util::{Identity, ResourceId, UsageId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// SQLite store. The connection is guarded by a mutex; all access is
/// serialized, which is fine for the daemon's modest write rate.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!(path = %path.display(), "Opened pool database");
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                address TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'available',
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS usages (
                id TEXT PRIMARY KEY,
                resource_id TEXT NOT NULL,
                identity TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                planned_minutes INTEGER NOT NULL,
                extended_minutes INTEGER NOT NULL DEFAULT 0,
                actual_seconds INTEGER,
                auto_released INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_usages_open
                ON usages(resource_id) WHERE ended_at IS NULL;
            CREATE INDEX IF NOT EXISTS idx_usages_resource
                ON usages(resource_id, started_at);

            CREATE TABLE IF NOT EXISTS queue_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                resource_id TEXT NOT NULL,
                identity TEXT NOT NULL,
                joined_at TEXT NOT NULL,
                requested_minutes INTEGER NOT NULL,
                estimated_wait_seconds INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_active_pair
                ON queue_entries(resource_id, identity) WHERE active = 1;
            CREATE INDEX IF NOT EXISTS idx_queue_resource
                ON queue_entries(resource_id, joined_at) WHERE active = 1;

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                actor TEXT,
                resource_id TEXT,
                event_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_timestamp
                ON audit_log(timestamp);
            "#,
        )?;
        debug!("Database schema initialized");
        Ok(())
    }
}

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Database(format!("Invalid timestamp '{}': {}", s, e)))
}

fn resource_from_row(row: &Row) -> rusqlite::Result<(ResourceRow, String, String, String, String)> {
    Ok((
        ResourceRow {
            id: ResourceId::new(row.get::<_, String>(0)?),
            name: row.get(1)?,
            address: row.get(2)?,
            kind: ResourceKind::Linux,
            status: ResourceStatus::Available,
            active: row.get::<_, i64>(5)? != 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        },
        row.get::<_, String>(3)?,
        row.get::<_, String>(4)?,
        row.get::<_, String>(6)?,
        row.get::<_, String>(7)?,
    ))
}

fn finish_resource(
    raw: (ResourceRow, String, String, String, String),
) -> StoreResult<ResourceRow> {
    let (mut row, kind, status, created, updated) = raw;
    row.kind = ResourceKind::parse(&kind)
        .ok_or_else(|| StoreError::Database(format!("Unknown resource kind '{}'", kind)))?;
    row.status = ResourceStatus::parse(&status)
        .ok_or_else(|| StoreError::Database(format!("Unknown resource status '{}'", status)))?;
    row.created_at = parse_ts(&created)?;
    row.updated_at = parse_ts(&updated)?;
    Ok(row)
}

const RESOURCE_COLUMNS: &str =
    "id, name, address, kind, status, active, created_at, updated_at";

fn usage_from_row(row: &Row) -> rusqlite::Result<(String, String, String, String, Option<String>, u32, u32, Option<i64>, bool)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get::<_, i64>(8)? != 0,
    ))
}

fn finish_usage(
    raw: (String, String, String, String, Option<String>, u32, u32, Option<i64>, bool),
) -> StoreResult<UsageRow> {
    let (id, resource_id, identity, started, ended, planned, extended, actual, auto) = raw;
    Ok(UsageRow {
        id: UsageId::parse(&id)
            .ok_or_else(|| StoreError::Database(format!("Invalid usage ID '{}'", id)))?,
        resource_id: ResourceId::new(resource_id),
        identity: Identity::new(identity),
        started_at: parse_ts(&started)?,
        ended_at: ended.as_deref().map(parse_ts).transpose()?,
        planned_minutes: planned,
        extended_minutes: extended,
        actual_seconds: actual,
        auto_released: auto,
    })
}

const USAGE_COLUMNS: &str = "id, resource_id, identity, started_at, ended_at, \
     planned_minutes, extended_minutes, actual_seconds, auto_released";

fn queue_from_row(row: &Row) -> rusqlite::Result<(i64, String, String, String, u32, u64, bool)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get::<_, i64>(5)?.max(0) as u64,
        row.get::<_, i64>(6)? != 0,
    ))
}

fn finish_queue(raw: (i64, String, String, String, u32, u64, bool)) -> StoreResult<QueueRow> {
    let (id, resource_id, identity, joined, requested, estimate, active) = raw;
    Ok(QueueRow {
        id,
        resource_id: ResourceId::new(resource_id),
        identity: Identity::new(identity),
        joined_at: parse_ts(&joined)?,
        requested_minutes: requested,
        estimated_wait_seconds: estimate,
        active,
    })
}

const QUEUE_COLUMNS: &str =
    "id, resource_id, identity, joined_at, requested_minutes, estimated_wait_seconds, active";

impl Store for SqliteStore {
    fn insert_resource(&self, row: &ResourceRow) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO resources (id, name, address, kind, status, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.id.as_str(),
                row.name,
                row.address,
                row.kind.as_str(),
                row.status.as_str(),
                row.active as i64,
                ts(row.created_at),
                ts(row.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<ResourceRow>> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM resources WHERE id = ?1", RESOURCE_COLUMNS),
                params![id.as_str()],
                resource_from_row,
            )
            .optional()?;
        raw.map(finish_resource).transpose()
    }

    fn list_resources(&self) -> StoreResult<Vec<ResourceRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM resources WHERE active = 1 ORDER BY name",
            RESOURCE_COLUMNS
        ))?;
        let rows = stmt.query_map([], resource_from_row)?;
        let mut resources = Vec::new();
        for raw in rows {
            resources.push(finish_resource(raw?)?);
        }
        Ok(resources)
    }

    fn set_resource_status(
        &self,
        id: &ResourceId,
        status: ResourceStatus,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE resources SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_str(), status.as_str(), ts(now)],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("resource {}", id)));
        }
        Ok(())
    }

    fn set_resource_active(
        &self,
        id: &ResourceId,
        active: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE resources SET active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id.as_str(), active as i64, ts(now)],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("resource {}", id)));
        }
        Ok(())
    }

    fn delete_resource_dependents(&self, id: &ResourceId) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM usages WHERE resource_id = ?1",
            params![id.as_str()],
        )?;
        conn.execute(
            "DELETE FROM queue_entries WHERE resource_id = ?1",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn insert_usage(&self, row: &UsageRow) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO usages ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                USAGE_COLUMNS
            ),
            params![
                row.id.to_string(),
                row.resource_id.as_str(),
                row.identity.as_str(),
                ts(row.started_at),
                row.ended_at.map(ts),
                row.planned_minutes,
                row.extended_minutes,
                row.actual_seconds,
                row.auto_released as i64,
            ],
        )?;
        Ok(())
    }

    fn get_usage(&self, id: &UsageId) -> StoreResult<Option<UsageRow>> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!("SELECT {} FROM usages WHERE id = ?1", USAGE_COLUMNS),
                params![id.to_string()],
                usage_from_row,
            )
            .optional()?;
        raw.map(finish_usage).transpose()
    }

    fn open_usage_for(&self, resource: &ResourceId) -> StoreResult<Option<UsageRow>> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM usages
                     WHERE resource_id = ?1 AND ended_at IS NULL
                     ORDER BY started_at ASC LIMIT 1",
                    USAGE_COLUMNS
                ),
                params![resource.as_str()],
                usage_from_row,
            )
            .optional()?;
        raw.map(finish_usage).transpose()
    }

    fn open_usages_for(&self, resource: &ResourceId) -> StoreResult<Vec<UsageRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM usages
             WHERE resource_id = ?1 AND ended_at IS NULL
             ORDER BY started_at DESC",
            USAGE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![resource.as_str()], usage_from_row)?;
        let mut usages = Vec::new();
        for raw in rows {
            usages.push(finish_usage(raw?)?);
        }
        Ok(usages)
    }

    fn close_usage(
        &self,
        id: &UsageId,
        ended_at: DateTime<Utc>,
        actual_seconds: i64,
        auto_released: bool,
    ) -> StoreResult<bool> {
        let conn = self.conn.lock().unwrap();
        // The ended_at guard makes closing idempotent.
        let changed = conn.execute(
            "UPDATE usages
             SET ended_at = ?2, actual_seconds = ?3, auto_released = ?4
             WHERE id = ?1 AND ended_at IS NULL",
            params![id.to_string(), ts(ended_at), actual_seconds, auto_released as i64],
        )?;
        Ok(changed > 0)
    }

    fn add_extension(&self, id: &UsageId, minutes: u32) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE usages SET extended_minutes = extended_minutes + ?2
             WHERE id = ?1 AND ended_at IS NULL",
            params![id.to_string(), minutes],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("open usage {}", id)));
        }
        Ok(())
    }

    fn insert_queue_entry(&self, row: &QueueRow) -> StoreResult<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO queue_entries
                 (resource_id, identity, joined_at, requested_minutes,
                  estimated_wait_seconds, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                row.resource_id.as_str(),
                row.identity.as_str(),
                ts(row.joined_at),
                row.requested_minutes,
                row.estimated_wait_seconds as i64,
                row.active as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn active_queue(&self, resource: &ResourceId) -> StoreResult<Vec<QueueRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM queue_entries
             WHERE resource_id = ?1 AND active = 1
             ORDER BY joined_at ASC, id ASC",
            QUEUE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![resource.as_str()], queue_from_row)?;
        let mut entries = Vec::new();
        for raw in rows {
            entries.push(finish_queue(raw?)?);
        }
        Ok(entries)
    }

    fn active_queue_entry(
        &self,
        resource: &ResourceId,
        identity: &Identity,
    ) -> StoreResult<Option<QueueRow>> {
        let conn = self.conn.lock().unwrap();
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM queue_entries
                     WHERE resource_id = ?1 AND identity = ?2 AND active = 1",
                    QUEUE_COLUMNS
                ),
                params![resource.as_str(), identity.as_str()],
                queue_from_row,
            )
            .optional()?;
        raw.map(finish_queue).transpose()
    }

    fn deactivate_queue_entry(&self, entry_id: i64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE queue_entries SET active = 0 WHERE id = ?1 AND active = 1",
            params![entry_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("queue entry {}", entry_id)));
        }
        Ok(())
    }

    fn purge_inactive_entries(
        &self,
        resource: &ResourceId,
        identity: &Identity,
    ) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let removed = conn.execute(
            "DELETE FROM queue_entries
             WHERE resource_id = ?1 AND identity = ?2 AND active = 0",
            params![resource.as_str(), identity.as_str()],
        )?;
        Ok(removed)
    }

    fn set_estimated_wait(&self, entry_id: i64, seconds: u64) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE queue_entries SET estimated_wait_seconds = ?2 WHERE id = ?1",
            params![entry_id, seconds as i64],
        )?;
        Ok(())
    }

    fn bump_estimates(&self, resource: &ResourceId, add_seconds: u64) -> StoreResult<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE queue_entries
             SET estimated_wait_seconds = estimated_wait_seconds + ?2
             WHERE resource_id = ?1 AND active = 1",
            params![resource.as_str(), add_seconds as i64],
        )?;
        Ok(changed)
    }

    fn append_audit(&self, event: AuditEvent) -> StoreResult<()> {
        let event_json = serde_json::to_string(&event.event)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_log (timestamp, actor, resource_id, event_json)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                ts(event.timestamp),
                event.actor.as_ref().map(|a| a.as_str()),
                event.resource.as_ref().map(|r| r.as_str()),
                event_json,
            ],
        )?;
        Ok(())
    }

    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, actor, resource_id, event_json
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;
        let mut events = Vec::new();
        for raw in rows {
            let (id, timestamp, actor, resource, event_json) = raw?;
            events.push(AuditEvent {
                id,
                timestamp: parse_ts(&timestamp)?,
                actor: actor.map(Identity::new),
                resource: resource.map(ResourceId::new),
                event: serde_json::from_str(&event_json)?,
            });
        }
        Ok(events)
    }

    fn is_healthy(&self) -> bool {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map(|v| v == 1)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AuditEventType;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn resource(id: &str, name: &str, address: &str) -> ResourceRow {
        ResourceRow {
            id: ResourceId::new(id),
            name: name.to_string(),
            address: address.to_string(),
            kind: ResourceKind::Ubuntu,
            status: ResourceStatus::Available,
            active: true,
            created_at: t0(),
            updated_at: t0(),
        }
    }

    fn usage(resource: &str, identity: &str, started_at: DateTime<Utc>) -> UsageRow {
        UsageRow {
            id: UsageId::new(),
            resource_id: ResourceId::new(resource),
            identity: Identity::new(identity),
            started_at,
            ended_at: None,
            planned_minutes: 60,
            extended_minutes: 0,
            actual_seconds: None,
            auto_released: false,
        }
    }

    fn entry(resource: &str, identity: &str, joined_at: DateTime<Utc>) -> QueueRow {
        QueueRow {
            id: 0,
            resource_id: ResourceId::new(resource),
            identity: Identity::new(identity),
            joined_at,
            requested_minutes: 30,
            estimated_wait_seconds: 0,
            active: true,
        }
    }

    #[test]
    fn resource_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let row = resource("ubuntu-240", "Lab 240", "10.1.0.40");
        store.insert_resource(&row).unwrap();

        let loaded = store.get_resource(&row.id).unwrap().unwrap();
        assert_eq!(loaded, row);
        assert!(store.get_resource(&ResourceId::new("nope")).unwrap().is_none());
    }

    #[test]
    fn list_skips_retired_resources() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_resource(&resource("a", "Machine A", "10.0.0.1"))
            .unwrap();
        store
            .insert_resource(&resource("b", "Machine B", "10.0.0.2"))
            .unwrap();
        store
            .set_resource_active(&ResourceId::new("b"), false, t0())
            .unwrap();

        let listed = store.list_resources().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id.as_str(), "a");
    }

    #[test]
    fn status_update_missing_resource_fails() {
        let store = SqliteStore::in_memory().unwrap();
        let err = store
            .set_resource_status(&ResourceId::new("ghost"), ResourceStatus::Occupied, t0())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn open_usage_picks_oldest() {
        let store = SqliteStore::in_memory().unwrap();
        let old = usage("win-101", "user1", t0());
        let newer = usage("win-101", "user2", t0() + Duration::minutes(5));
        store.insert_usage(&newer).unwrap();
        store.insert_usage(&old).unwrap();

        let current = store
            .open_usage_for(&ResourceId::new("win-101"))
            .unwrap()
            .unwrap();
        assert_eq!(current.id, old.id);

        // Reconciliation order is newest first.
        let all = store.open_usages_for(&ResourceId::new("win-101")).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, newer.id);
    }

    #[test]
    fn close_usage_is_idempotent() {
        let store = SqliteStore::in_memory().unwrap();
        let u = usage("win-101", "user1", t0());
        store.insert_usage(&u).unwrap();

        let ended = t0() + Duration::minutes(20);
        assert!(store.close_usage(&u.id, ended, 1200, false).unwrap());
        assert!(!store.close_usage(&u.id, ended, 9999, true).unwrap());

        let loaded = store.get_usage(&u.id).unwrap().unwrap();
        assert_eq!(loaded.ended_at, Some(ended));
        assert_eq!(loaded.actual_seconds, Some(1200));
        assert!(!loaded.auto_released);
    }

    #[test]
    fn extension_accumulates() {
        let store = SqliteStore::in_memory().unwrap();
        let u = usage("win-101", "user1", t0());
        store.insert_usage(&u).unwrap();

        store.add_extension(&u.id, 15).unwrap();
        store.add_extension(&u.id, 15).unwrap();
        let loaded = store.get_usage(&u.id).unwrap().unwrap();
        assert_eq!(loaded.extended_minutes, 30);

        store.close_usage(&u.id, t0(), 0, false).unwrap();
        assert!(store.add_extension(&u.id, 15).is_err());
    }

    #[test]
    fn queue_is_fifo_by_joined_at() {
        let store = SqliteStore::in_memory().unwrap();
        let rid = ResourceId::new("mac-7");
        store
            .insert_queue_entry(&entry("mac-7", "second", t0() + Duration::seconds(10)))
            .unwrap();
        store.insert_queue_entry(&entry("mac-7", "first", t0())).unwrap();

        let queue = store.active_queue(&rid).unwrap();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].identity.as_str(), "first");
        assert_eq!(queue[1].identity.as_str(), "second");
    }

    #[test]
    fn deactivated_entry_leaves_queue() {
        let store = SqliteStore::in_memory().unwrap();
        let rid = ResourceId::new("mac-7");
        let id = store.insert_queue_entry(&entry("mac-7", "user1", t0())).unwrap();

        store.deactivate_queue_entry(id).unwrap();
        assert!(store.active_queue(&rid).unwrap().is_empty());
        assert!(store
            .active_queue_entry(&rid, &Identity::new("user1"))
            .unwrap()
            .is_none());

        // Already gone.
        assert!(store.deactivate_queue_entry(id).is_err());

        // Purge clears the dead row so the pair can rejoin.
        let removed = store
            .purge_inactive_entries(&rid, &Identity::new("user1"))
            .unwrap();
        assert_eq!(removed, 1);
        store.insert_queue_entry(&entry("mac-7", "user1", t0())).unwrap();
    }

    #[test]
    fn bump_estimates_touches_active_entries_only() {
        let store = SqliteStore::in_memory().unwrap();
        let rid = ResourceId::new("mac-7");
        let a = store.insert_queue_entry(&entry("mac-7", "a", t0())).unwrap();
        let b = store
            .insert_queue_entry(&entry("mac-7", "b", t0() + Duration::seconds(1)))
            .unwrap();
        store.set_estimated_wait(a, 100).unwrap();
        store.set_estimated_wait(b, 200).unwrap();
        store.deactivate_queue_entry(b).unwrap();

        let changed = store.bump_estimates(&rid, 900).unwrap();
        assert_eq!(changed, 1);
        let queue = store.active_queue(&rid).unwrap();
        assert_eq!(queue[0].estimated_wait_seconds, 1000);
    }

    #[test]
    fn audit_round_trip_newest_first() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .append_audit(AuditEvent::new(t0(), AuditEventType::ServiceStarted))
            .unwrap();
        store
            .append_audit(
                AuditEvent::new(
                    t0() + Duration::seconds(5),
                    AuditEventType::QueueLeft,
                )
                .with_actor(Identity::new("user1"))
                .with_resource(ResourceId::new("ubuntu-240")),
            )
            .unwrap();

        let events = store.get_recent_audits(10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, AuditEventType::QueueLeft));
        assert_eq!(events[0].actor, Some(Identity::new("user1")));
        assert!(matches!(events[1].event, AuditEventType::ServiceStarted));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .insert_resource(&resource("a", "Machine A", "10.0.0.1"))
                .unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.list_resources().unwrap().len(), 1);
        assert!(store.is_healthy());
    }
}
