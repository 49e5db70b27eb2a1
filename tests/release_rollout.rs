//! Release and rollout behaviour through the coordinator.
//!
//! Covers the publish/read linearization, first-query provisioning,
//! promotion idempotence and the fleet rollout scenario.

use std::io::Read;
use std::thread;

use ota_release::{Coordinator, EffectiveConfig, ErrorKind, RecordOrigin, Settings};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

fn settings(dir: &TempDir) -> Settings {
    EffectiveConfig::build(
        None,
        None,
        Some(serde_json::json!({ "storage": { "root": dir.path() } })),
    )
    .unwrap()
    .settings()
    .unwrap()
}

fn read_blob(coordinator: &Coordinator, storage_key: &str) -> Vec<u8> {
    let (mut file, len) = coordinator.open_download(storage_key).unwrap();
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes.len() as u64, len);
    bytes
}

// === Release pool ===

#[test]
fn test_publish_round_trip() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();

    coordinator
        .publish("2.3.1", &b"release 2.3.1"[..], Some("fix crash"))
        .unwrap();

    let latest = coordinator.latest();
    assert_eq!(latest.current.version, "2.3.1");
    assert_eq!(latest.release_notes, "fix crash");
    assert_eq!(latest.origin, RecordOrigin::Published);
    assert_eq!(read_blob(&coordinator, &latest.current.storage_key), b"release 2.3.1");
}

#[test]
fn test_readers_never_see_mixed_records() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();
    coordinator.publish("1.0.0", &b"1.0.0"[..], Some("notes 1.0.0")).unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for patch in 1..=20 {
                let version = format!("1.0.{patch}");
                let notes = format!("notes {version}");
                coordinator
                    .publish(&version, version.as_bytes(), Some(notes.as_str()))
                    .unwrap();
            }
        });
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..500 {
                    let record = coordinator.latest();
                    let version = &record.current.version;
                    assert_eq!(record.release_notes, format!("notes {version}"));
                    assert!(record.current.storage_key.contains(version.as_str()));
                    assert_eq!(record.current.size_bytes, version.len() as u64);
                }
            });
        }
    });

    let settled = coordinator.latest();
    assert_eq!(settled.current.version, "1.0.20");
    assert_eq!(read_blob(&coordinator, &settled.current.storage_key), b"1.0.20");
}

#[test]
fn test_rejected_publish_keeps_previous_release() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();
    coordinator.publish("1.0.0", &b"one"[..], None).unwrap();

    let err = coordinator.publish("1.1.0", &b""[..], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    let err = coordinator.publish("../1.1.0", &b"x"[..], None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathTraversal);

    assert_eq!(coordinator.latest().current.version, "1.0.0");
}

#[test]
fn test_republished_version_serves_advertised_bytes() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();

    let first = coordinator.publish("1.0.0", &b"first build"[..], Some("a")).unwrap();
    let second = coordinator.publish("1.0.0", &b"second build"[..], Some("b")).unwrap();
    assert_ne!(first.current.storage_key, second.current.storage_key);

    let latest = coordinator.latest();
    let bytes = read_blob(&coordinator, &latest.current.storage_key);
    assert_eq!(bytes, b"second build");
    assert_eq!(hex::encode(Sha256::digest(&bytes)), latest.current.content_hash);
    assert_eq!(bytes.len() as u64, latest.current.size_bytes);
}

// === Rollout table ===

#[test]
fn test_first_query_provisions_latest() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();
    coordinator.publish("1.4.0", &b"fourteen"[..], None).unwrap();

    let entry = coordinator.get_current("tablet-7").unwrap();
    let latest = coordinator.latest();
    assert!(entry.assigned.same_content(&latest.current));
    assert_ne!(entry.assigned.storage_key, latest.current.storage_key);
    assert_eq!(read_blob(&coordinator, &entry.assigned.storage_key), b"fourteen");
}

#[test]
fn test_first_queries_racing_publishes_get_readable_copies() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();
    coordinator.publish("1.0.0", &b"1.0.0"[..], None).unwrap();

    let entries = thread::scope(|s| {
        s.spawn(|| {
            for minor in 1..=100 {
                let version = format!("1.{minor}.0");
                coordinator.publish(&version, version.as_bytes(), None).unwrap();
            }
        });
        let queries: Vec<_> = (0..3)
            .map(|group| {
                let coordinator = &coordinator;
                s.spawn(move || {
                    (0..50)
                        .map(|n| coordinator.get_current(&format!("g{group}-{n}")).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        queries
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(entries.len(), 150);
    for entry in entries {
        let bytes = read_blob(&coordinator, &entry.assigned.storage_key);
        assert_eq!(bytes, entry.assigned.version.as_bytes(), "{}", entry.device_id);
    }
}

#[test]
fn test_promote_twice_yields_same_entry() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();
    coordinator.get_current("dev-1").unwrap();
    coordinator.publish("2.0.0", &b"two"[..], None).unwrap();

    let first = coordinator.promote("dev-1").unwrap();
    let second = coordinator.promote("dev-1").unwrap();
    assert_eq!(first, second);
    assert_eq!(first.assigned.version, "2.0.0");
}

#[test]
fn test_fleet_rollout_scenario() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();

    let dev42 = coordinator.get_current("dev-42").unwrap();
    assert_eq!(dev42.assigned.version, "1.0.0");
    let dev43 = coordinator.get_current("dev-43").unwrap();
    assert_eq!(dev43.assigned.version, "1.0.0");

    coordinator.publish("1.1.0", &b"v1.1.0"[..], Some("second")).unwrap();
    assert_eq!(coordinator.get_current("dev-42").unwrap().assigned.version, "1.0.0");

    let promoted = coordinator.promote("dev-42").unwrap();
    assert_eq!(promoted.assigned.version, "1.1.0");
    assert_eq!(coordinator.get_current("dev-42").unwrap().assigned.version, "1.1.0");
    assert_eq!(coordinator.get_current("dev-43").unwrap().assigned.version, "1.0.0");

    let report = coordinator.promote_all();
    assert!(report.is_complete());
    assert_eq!(report.count(), 2);
    assert_eq!(coordinator.get_current("dev-43").unwrap().assigned.version, "1.1.0");
}

#[test]
fn test_promotion_never_exposes_an_empty_device() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();
    coordinator.publish("1.0.0", &b"1.0.0"[..], None).unwrap();
    coordinator.get_current("dev-1").unwrap();

    thread::scope(|s| {
        s.spawn(|| {
            for minor in 1..=8 {
                let version = format!("1.{minor}.0");
                coordinator.publish(&version, version.as_bytes(), None).unwrap();
                coordinator.promote("dev-1").unwrap();
            }
        });
        s.spawn(|| {
            for _ in 0..300 {
                let entry = coordinator.get_current("dev-1").unwrap();
                assert!(entry.assigned.size_bytes > 0);
                assert!(entry.assigned.version.starts_with("1."));
            }
        });
    });

    let entry = coordinator.get_current("dev-1").unwrap();
    assert_eq!(entry.assigned.version, "1.8.0");
    assert_eq!(read_blob(&coordinator, &entry.assigned.storage_key), b"1.8.0");
}

#[test]
fn test_invalid_device_ids_are_rejected() {
    let dir = TempDir::new().unwrap();
    let coordinator = Coordinator::open(&settings(&dir)).unwrap();

    for (raw, kind) in [
        ("../etc", ErrorKind::PathTraversal),
        ("a/b", ErrorKind::PathTraversal),
        ("", ErrorKind::Validation),
        ("dev 1", ErrorKind::Validation),
    ] {
        assert_eq!(coordinator.get_current(raw).unwrap_err().kind(), kind, "{raw:?}");
    }
    assert!(coordinator.devices().is_empty());
}
