mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use efsf_backend::{BackendError, RawRecord, StorageBackend};
use efsf_core::{DestructionMethod, Sensitive};
use efsf_store::{PutOptions, StoreError};
use pretty_assertions::assert_eq;

use common::{harness, quiet_options};

#[tokio::test]
async fn failed_save_leaves_no_key_behind() {
    let h = harness(quiet_options()).await;
    h.backend.fail_save.store(true, Ordering::SeqCst);

    let err = h.store.put(b"x", PutOptions::new()).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(BackendError::Backend(_))), "{err}");
    assert_eq!(h.crypto.key_count(), 0);
    assert_eq!(h.store.stats().active_records, 0);
}

#[tokio::test]
async fn slow_backend_surfaces_timeout() {
    let h = harness(quiet_options()).await;
    h.backend.delay_ms.store(1_000, Ordering::SeqCst);

    let err = h.store.put(b"x", PutOptions::new()).await.unwrap_err();
    match err {
        StoreError::Backend(BackendError::Timeout { op, after_ms }) => {
            assert_eq!(op, "save");
            assert_eq!(after_ms, 200);
        }
        other => panic!("expected timeout, got {other}"),
    }
    assert_eq!(h.crypto.key_count(), 0);
}

#[tokio::test]
async fn failed_delete_shreds_key_and_retry_completes() {
    let h = harness(quiet_options()).await;
    let rec = h.store.put(b"x", PutOptions::new()).await.unwrap();

    h.backend.fail_delete.store(true, Ordering::SeqCst);
    let err = h.store.destroy(rec.id()).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(_)), "{err}");

    // Key is gone even though the ciphertext is still on the backend.
    assert_eq!(h.crypto.key_count(), 0);
    assert_eq!(h.store.stats().active_records, 0);
    assert!(!h.store.exists(rec.id()).await);
    assert!(matches!(
        h.store.get(rec.id()).await.unwrap_err(),
        StoreError::RecordNotFound(_)
    ));
    assert_eq!(h.store.certificate_for(rec.id()).await.unwrap(), None);

    h.backend.fail_delete.store(false, Ordering::SeqCst);
    let cert = h.store.destroy(rec.id()).await.unwrap();
    assert_eq!(cert.method(), DestructionMethod::Explicit);
    assert!(h.backend.inner.is_empty().await);
    let stats = h.store.stats();
    assert_eq!(stats.active_records, 0);
    assert_eq!(stats.destroys, 1);
}

#[tokio::test]
async fn sweep_counts_failures_and_keeps_going() {
    let h = harness(quiet_options()).await;
    for _ in 0..3 {
        h.store
            .put(b"x", PutOptions::new().ttl(Duration::from_secs(1)))
            .await
            .unwrap();
    }
    h.clock.advance(Duration::from_secs(2));

    h.backend.fail_delete.store(true, Ordering::SeqCst);
    let report = h.store.reap_expired().await.unwrap();
    assert_eq!(report.destroyed, 0);
    assert_eq!(report.failures, 3);

    h.backend.fail_delete.store(false, Ordering::SeqCst);
    let report = h.store.reap_expired().await.unwrap();
    assert_eq!(report.destroyed, 3);
    assert_eq!(report.failures, 0);
    assert_eq!(h.store.stats().expired, 3);
}

#[tokio::test]
async fn sweep_purges_orphaned_backend_entries() {
    let h = harness(quiet_options()).await;
    // Left behind by an earlier process; its key no longer exists anywhere.
    h.backend
        .inner
        .save(
            "orphan-1",
            RawRecord {
                expires_at: Utc::now() - chrono::Duration::seconds(1),
                bytes: Sensitive(b"stale envelope".to_vec()),
            },
        )
        .await
        .unwrap();
    let live = h.store.put(b"x", PutOptions::new()).await.unwrap();

    let report = h.store.reap_expired().await.unwrap();
    assert_eq!(report.orphans_purged, 1);
    assert_eq!(report.destroyed, 0);
    assert!(h.backend.inner.load("orphan-1").await.unwrap().is_none());
    assert!(h.store.exists(live.id()).await);
}

#[tokio::test]
async fn close_aggregates_failures() {
    let h = harness(quiet_options()).await;
    let a = h.store.put(b"a", PutOptions::new()).await.unwrap();
    let b = h.store.put(b"b", PutOptions::new()).await.unwrap();
    h.backend.fail_delete.store(true, Ordering::SeqCst);
    h.backend.fail_close.store(true, Ordering::SeqCst);

    let report = h.store.close().await;
    assert_eq!(report.destroyed, 0);
    assert_eq!(report.failures.len(), 3);

    let mut failed: Vec<_> = report
        .failures
        .iter()
        .filter_map(|f| f.resource_id.clone())
        .collect();
    failed.sort();
    let mut expected = vec![a.id().to_string(), b.id().to_string()];
    expected.sort();
    assert_eq!(failed, expected);
    assert!(report.failures.iter().any(|f| f.error.contains("backend close")));

    // Keys were shredded before the deletes failed.
    assert_eq!(h.crypto.key_count(), 0);
}
