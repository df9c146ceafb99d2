//! End-to-end lifecycle tests: config parsing, provisioning, the full
//! occupy / queue / extend / expire / promote cycle, and restart
//! recovery, all against a real on-disk database.

use chrono::{TimeZone, Utc};
use labpool_api::ResourceStatus;
use labpool_config::parse_config;
use labpool_core::{AllocationEngine, ExpiryScheduler, ResourceSeed, SessionPolicy};
use labpool_store::{AuditEventType, SqliteStore, Store};
use labpool_util::{Identity, ManualClock, PoolError, ResourceId};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
config_version = 1

[defaults]
session_minutes = 60
extension_minutes = 15

[[resources]]
id = "win-101"
name = "Windows 101"
address = "10.1.0.11"
kind = "windows"

[[resources]]
id = "ubuntu-240"
name = "Ubuntu 240"
address = "10.1.0.40"
kind = "ubuntu"
"#;

fn build_engine(db_path: &Path, clock: Arc<ManualClock>) -> Arc<AllocationEngine> {
    let config = parse_config(CONFIG).unwrap();
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(db_path).unwrap());
    let engine = Arc::new(AllocationEngine::new(
        store,
        clock,
        SessionPolicy {
            session_minutes: config.defaults.session_minutes,
            extension_minutes: config.defaults.extension_minutes,
        },
    ));
    for def in &config.resources {
        engine
            .provision(&ResourceSeed {
                id: def.id.clone(),
                name: def.name.clone(),
                address: def.address.clone(),
                kind: def.kind,
                maintenance: def.maintenance,
            })
            .unwrap();
    }
    engine.reconcile().unwrap();
    engine
}

fn t0() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
}

#[test]
fn full_reservation_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("labpoold.db");
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = build_engine(&db_path, clock.clone());

    let win = ResourceId::new("win-101");
    let alice = Identity::new("alice");
    let bob = Identity::new("bob");
    let carol = Identity::new("carol");

    // Alice takes the Windows box for half an hour.
    let occupied = engine.occupy(&alice, &win, Some(30)).unwrap();
    assert_eq!(occupied.usage.identity, alice);

    // Bob and Carol line up behind her.
    let join = engine.join_queue(&bob, &win, Some(30)).unwrap();
    assert_eq!(join.position, 1);
    assert_eq!(join.estimated_wait_seconds, 30 * 60);

    clock.advance(Duration::from_secs(1));
    let join = engine.join_queue(&carol, &win, Some(45)).unwrap();
    assert_eq!(join.position, 2);
    assert_eq!(join.estimated_wait_seconds, 30 * 60 - 1 + 30 * 60);

    // Alice extends; everyone's wait grows by the same 15 minutes.
    let extended = engine.extend(&alice, &win, None).unwrap();
    assert_eq!(extended.added_minutes, 15);

    // Her extended window runs out; the scheduler closes it and Bob
    // takes over with a fresh default session.
    clock.advance(Duration::from_secs(46 * 60));
    let scheduler = ExpiryScheduler::new(engine.clone(), Duration::from_secs(120));
    let outcomes = scheduler.scan_once();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].auto_released);
    assert_eq!(outcomes[0].closed.identity, alice);
    let promotion = outcomes[0].promoted.as_ref().unwrap();
    assert_eq!(promotion.identity, bob);
    assert_eq!(promotion.usage.planned_minutes, 60);

    // Bob hands it straight to Carol.
    clock.advance(Duration::from_secs(10 * 60));
    let released = engine.release(&bob, &win).unwrap();
    assert_eq!(released.actual_seconds, 10 * 60);
    assert_eq!(released.promoted.unwrap().identity, carol);

    // Carol finishes; the machine is free again.
    clock.advance(Duration::from_secs(5 * 60));
    engine.release(&carol, &win).unwrap();
    let (snap, _) = engine.status(&carol, &win).unwrap();
    assert_eq!(snap.status, ResourceStatus::Available);
    assert!(snap.queue.is_empty());
}

#[test]
fn audit_trail_records_the_whole_story() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("labpoold.db");
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = build_engine(&db_path, clock.clone());

    let win = ResourceId::new("win-101");
    engine.occupy(&Identity::new("alice"), &win, Some(30)).unwrap();
    engine.join_queue(&Identity::new("bob"), &win, Some(30)).unwrap();
    engine.extend(&Identity::new("alice"), &win, Some(15)).unwrap();
    clock.advance(Duration::from_secs(50 * 60));
    engine.run_expiry_scan().unwrap();

    let store = SqliteStore::open(&db_path).unwrap();
    let audits = store.get_recent_audits(50).unwrap();
    let has = |pred: fn(&AuditEventType) -> bool| audits.iter().any(|a| pred(&a.event));

    assert!(has(|e| matches!(e, AuditEventType::ResourceProvisioned { .. })));
    assert!(has(|e| matches!(e, AuditEventType::Occupied { .. })));
    assert!(has(|e| matches!(e, AuditEventType::QueueJoined { .. })));
    assert!(has(|e| matches!(e, AuditEventType::TimeExtended { .. })));
    assert!(has(|e| matches!(e, AuditEventType::AutoReleased { .. })));
    assert!(has(|e| matches!(e, AuditEventType::QueuePromoted { .. })));
}

#[test]
fn restart_keeps_sessions_and_queues() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("labpoold.db");
    let clock = Arc::new(ManualClock::new(t0()));

    {
        let engine = build_engine(&db_path, clock.clone());
        engine
            .occupy(&Identity::new("alice"), &ResourceId::new("win-101"), Some(60))
            .unwrap();
        engine
            .join_queue(&Identity::new("bob"), &ResourceId::new("win-101"), Some(30))
            .unwrap();
    }

    // Daemon restart: re-provision and reconcile against the same file.
    clock.advance(Duration::from_secs(10 * 60));
    let engine = build_engine(&db_path, clock.clone());

    let (snap, expired) = engine
        .status(&Identity::new("alice"), &ResourceId::new("win-101"))
        .unwrap();
    assert!(expired.is_none());
    let occupant = snap.occupant.unwrap();
    assert_eq!(occupant.identity, Identity::new("alice"));
    assert_eq!(occupant.remaining_seconds, 50 * 60);
    assert_eq!(snap.queue.len(), 1);

    // The session still expires on schedule after the restart.
    clock.advance(Duration::from_secs(51 * 60));
    let outcome = engine
        .expire_if_due(&ResourceId::new("win-101"))
        .unwrap()
        .unwrap();
    assert_eq!(outcome.promoted.unwrap().identity, Identity::new("bob"));
}

#[test]
fn second_daemon_error_paths_match_protocol() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("labpoold.db");
    let clock = Arc::new(ManualClock::new(t0()));
    let engine = build_engine(&db_path, clock);

    let win = ResourceId::new("win-101");
    engine.occupy(&Identity::new("alice"), &win, Some(30)).unwrap();

    assert!(matches!(
        engine.occupy(&Identity::new("bob"), &win, Some(30)),
        Err(PoolError::Conflict(_))
    ));
    assert!(matches!(
        engine.release(&Identity::new("bob"), &win),
        Err(PoolError::Forbidden(_))
    ));
    assert!(matches!(
        engine.leave_queue(&Identity::new("bob"), &win),
        Err(PoolError::NotQueued)
    ));
    assert!(matches!(
        engine.status(&Identity::new("bob"), &ResourceId::new("ghost")),
        Err(PoolError::NotFound(_))
    ));
}
