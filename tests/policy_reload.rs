//! Policy store behavior: checksum stability, snapshot ordering, and the
//! background file watcher.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;

use fiducia::application::audit::AuditLog;
use fiducia::application::policy::{PolicyStore, default_document};
use fiducia::domain::compliance::rules::PolicyDocument;
use fiducia::domain::errors::PolicySourceError;

fn temp_policy_file(doc: &PolicyDocument) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("fiducia-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("policies.json");
    std::fs::write(&path, serde_json::to_string_pretty(doc).unwrap()).unwrap();
    path
}

#[tokio::test]
async fn checksum_survives_serialization_round_trip() {
    let doc = default_document();
    let serialized = serde_json::to_string(&doc).unwrap();
    let reparsed = PolicyDocument::parse(&serialized).unwrap();
    assert_eq!(doc.checksum(), reparsed.checksum());
    assert_eq!(doc.canonical_json(), reparsed.canonical_json());
}

#[tokio::test]
async fn snapshot_before_first_load_fails() {
    let store = PolicyStore::new(Arc::new(AuditLog::new(None)), None);
    assert!(matches!(store.snapshot(), Err(PolicySourceError::NotLoaded)));
}

#[tokio::test]
async fn load_from_source_reads_the_configured_file() {
    let path = temp_policy_file(&default_document());
    let store = PolicyStore::new(Arc::new(AuditLog::new(None)), Some(path));
    let snapshot = store.load_from_source().await.unwrap();
    assert_eq!(snapshot.version, "v1");
    assert!(snapshot.rule("CONC-001").is_some());
}

#[tokio::test]
async fn watcher_reloads_on_change_and_survives_bad_documents() {
    let path = temp_policy_file(&default_document());
    let store = Arc::new(PolicyStore::new(
        Arc::new(AuditLog::new(None)),
        Some(path.clone()),
    ));
    store.load_from_source().await.unwrap();

    let notifications = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&notifications);
    store.subscribe(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = store
        .start_watcher(Duration::from_millis(20), stop_rx)
        .expect("watcher should start");

    // A malformed document must not replace the good snapshot.
    std::fs::write(&path, "{ not json").unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(store.snapshot().unwrap().version, "v1");
    assert_eq!(notifications.load(Ordering::SeqCst), 0);

    // A real change reloads and notifies.
    let mut doc = default_document();
    doc.version = "v2".to_string();
    std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();

    let mut reloaded = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if store.snapshot().unwrap().version == "v2" {
            reloaded = true;
            break;
        }
    }
    assert!(reloaded, "watcher never picked up the new document");
    assert!(notifications.load(Ordering::SeqCst) >= 1);

    let _ = stop_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
}

#[tokio::test]
async fn snapshots_are_monotonic_for_subscribers() {
    let store = Arc::new(PolicyStore::new(Arc::new(AuditLog::new(None)), None));
    let versions = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&versions);
    store.subscribe(move |snapshot| {
        sink.lock().unwrap().push(snapshot.version.clone());
    });

    for version in ["v1", "v2", "v3"] {
        let mut doc = default_document();
        doc.version = version.to_string();
        store.update(doc).await;
    }

    assert_eq!(*versions.lock().unwrap(), vec!["v1", "v2", "v3"]);
}
