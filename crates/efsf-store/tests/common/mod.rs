#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use efsf_backend::{BackendError, InMemoryBackend, RawRecord, StorageBackend};
use efsf_core::ManualClock;
use efsf_crypto::CryptoProvider;
use efsf_store::{EphemeralStore, StoreOptions};

/// Deterministic options: no background reaper, short backend timeout.
pub fn quiet_options() -> StoreOptions {
    StoreOptions {
        reap_interval: None,
        backend_timeout: Duration::from_millis(200),
        ..StoreOptions::default()
    }
}

pub struct Harness {
    pub store: EphemeralStore,
    pub clock: Arc<ManualClock>,
    pub crypto: Arc<CryptoProvider>,
    pub backend: Arc<FaultyBackend>,
}

pub async fn harness(options: StoreOptions) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let crypto = Arc::new(CryptoProvider::new());
    let backend = Arc::new(FaultyBackend::default());
    let store = EphemeralStore::open_with(options, backend.clone(), crypto.clone(), clock.clone())
        .await
        .unwrap();
    Harness {
        store,
        clock,
        crypto,
        backend,
    }
}

/// In-memory backend with switchable failures and delays.
#[derive(Default)]
pub struct FaultyBackend {
    pub inner: InMemoryBackend,
    pub fail_save: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_close: AtomicBool,
    pub delay_ms: AtomicU64,
}

impl FaultyBackend {
    async fn pause(&self) {
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn injected(op: &str) -> BackendError {
        BackendError::Backend(format!("injected {op} failure"))
    }
}

#[async_trait]
impl StorageBackend for FaultyBackend {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn load(&self, id: &str) -> Result<Option<RawRecord>, BackendError> {
        self.pause().await;
        self.inner.load(id).await
    }

    async fn save(&self, id: &str, record: RawRecord) -> Result<(), BackendError> {
        self.pause().await;
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(Self::injected("save"));
        }
        self.inner.save(id, record).await
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.pause().await;
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Self::injected("delete"));
        }
        self.inner.delete(id).await
    }

    async fn scan_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, BackendError> {
        self.inner.scan_expired(now).await
    }

    async fn close(&self) -> Result<(), BackendError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Self::injected("close"));
        }
        self.inner.close().await
    }
}
