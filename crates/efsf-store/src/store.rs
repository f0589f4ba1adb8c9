use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use efsf_backend::{BackendError, RawRecord, StorageBackend};
use efsf_core::{
    ChainOfCustody, Clock, ConfigError, CustodyAction, DestructionCertificate, DestructionMethod,
    EphemeralRecord, Plaintext, ResourceKind, Sensitive, SystemClock,
};
use efsf_crypto::{AttestationError, CryptoError, CryptoProvider, KeyHandle};
use efsf_ledger::CertificateLedger;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::StoreError;
use crate::options::{PutOptions, StoreOptions};
use crate::reaper::ReaperHandle;
use crate::report::{CloseFailure, CloseReport, StoreStats, SweepReport};

/// What the backend holds for one record. The ciphertext is useless once the
/// record key has been destroyed.
#[derive(Serialize, Deserialize)]
struct StoredRecord {
    record: EphemeralRecord,
    ciphertext_b64: String,
}

const CUSTODY_ACTOR: &str = "efsf-store";

struct ActiveRecord {
    record: EphemeralRecord,
    key: KeyHandle,
    size_bytes: u64,
    /// Set once the key is destroyed; only the backend delete is outstanding.
    shredded_at: Option<DateTime<Utc>>,
}

impl ActiveRecord {
    fn is_readable(&self) -> bool {
        self.shredded_at.is_none()
    }
}

struct Tombstone {
    cert: DestructionCertificate,
    /// Certificate not yet in the ledger; retried by destroy, sweep and close.
    ledger_pending: bool,
}

enum Slot {
    Active(ActiveRecord),
    /// Terminal.
    Destroyed(Tombstone),
}

type SlotRef = Arc<Mutex<Slot>>;

#[derive(Default)]
struct Counters {
    puts: AtomicU64,
    gets: AtomicU64,
    destroys: AtomicU64,
    expired: AtomicU64,
    active: AtomicU64,
}

pub(crate) struct StoreInner {
    backend: Arc<dyn StorageBackend>,
    crypto: Arc<CryptoProvider>,
    clock: Arc<dyn Clock>,
    options: StoreOptions,
    ledger: Option<CertificateLedger>,
    slots: RwLock<HashMap<String, SlotRef>>,
    history: RwLock<Vec<DestructionCertificate>>,
    closed: AtomicBool,
    counters: Counters,
}

/// Time-bounded secret storage with verifiable destruction.
///
/// Each record moves `ACTIVE -> DESTROYED` exactly once. Reads, explicit
/// destroys and the reaper all take the record's own lock for the whole
/// transition, so a reader sees either the full plaintext or `RecordNotFound`.
pub struct EphemeralStore {
    inner: Arc<StoreInner>,
    reaper: Mutex<Option<ReaperHandle>>,
}

impl fmt::Debug for EphemeralStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralStore")
            .field("backend", &self.inner.backend.name())
            .field("attestation", &self.inner.options.attestation)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

impl EphemeralStore {
    /// Opens a store with a fresh attestation identity and the system clock.
    pub async fn open(
        options: StoreOptions,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, StoreError> {
        Self::open_with(
            options,
            backend,
            Arc::new(CryptoProvider::new()),
            Arc::new(SystemClock),
        )
        .await
    }

    pub async fn open_with(
        options: StoreOptions,
        backend: Arc<dyn StorageBackend>,
        crypto: Arc<CryptoProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        if let Some(ttl) = options.default_ttl {
            options.default_classification.validate_ttl(ttl)?;
        }
        if options.reap_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::InvalidTtl("reap_interval must be positive".to_string()).into());
        }
        if options.backend_timeout.is_zero() {
            return Err(
                ConfigError::InvalidTtl("backend_timeout must be positive".to_string()).into(),
            );
        }

        let ledger = match &options.ledger {
            Some(opts) => Some(CertificateLedger::open(opts.clone()).await?),
            None => None,
        };

        let reap_interval = options.reap_interval;
        info!(
            backend = backend.name(),
            attestation = options.attestation,
            default_classification = %options.default_classification,
            reaper = reap_interval.is_some(),
            ledger = ledger.is_some(),
            "ephemeral store opened"
        );

        let inner = Arc::new(StoreInner {
            backend,
            crypto,
            clock,
            options,
            ledger,
            slots: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
        });
        let reaper = reap_interval.map(|every| ReaperHandle::spawn(Arc::downgrade(&inner), every));

        Ok(Self {
            inner,
            reaper: Mutex::new(reaper),
        })
    }

    /// Encrypts `data` under a fresh per-record key and persists the envelope.
    ///
    /// The TTL is validated against the classification before any key exists.
    pub async fn put(&self, data: &[u8], opts: PutOptions) -> Result<EphemeralRecord, StoreError> {
        let inner = &self.inner;
        inner.ensure_open()?;

        let classification = opts
            .classification
            .unwrap_or(inner.options.default_classification);
        let ttl = classification.resolve_ttl(opts.ttl.or(inner.options.default_ttl))?;

        let key = inner.crypto.generate_key(classification);
        let record = match inner.persist_new(&key, data, ttl, opts).await {
            Ok(record) => record,
            Err(e) => {
                if let Err(destroy_err) = inner.crypto.destroy_key(&key) {
                    warn!(error = %destroy_err, "failed to drop key of unsaved record");
                }
                return Err(e);
            }
        };

        let id = record.id().to_string();
        let slot = Arc::new(Mutex::new(Slot::Active(ActiveRecord {
            record: record.clone(),
            key,
            size_bytes: data.len() as u64,
            shredded_at: None,
        })));
        inner
            .slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), slot.clone());
        inner.counters.puts.fetch_add(1, Ordering::Relaxed);
        inner.counters.active.fetch_add(1, Ordering::Relaxed);

        // Lost a race with close(): its sweep may have missed this slot.
        if inner.is_closed() {
            let mut guard = slot.lock().await;
            if let Err(e) = inner.destroy_locked(&id, &mut guard, None).await {
                warn!(record_id = %id, error = %e, "failed to destroy record put during close");
            }
            return Err(StoreError::Closed);
        }

        info!(
            record_id = %id,
            classification = %classification,
            ttl_ms = ttl.as_millis() as u64,
            "record stored"
        );
        Ok(record)
    }

    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        value: &T,
        opts: PutOptions,
    ) -> Result<EphemeralRecord, StoreError> {
        let bytes = Zeroizing::new(serde_json::to_vec(value)?);
        self.put(&bytes, opts).await
    }

    /// Decrypts a live record. Expiry is checked here on every read, so an
    /// expired record is unreadable even if the reaper has not run yet.
    pub async fn get(&self, id: &str) -> Result<Plaintext, StoreError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let slot = inner
            .slot(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        let mut guard = slot.lock().await;
        let active = match &mut *guard {
            Slot::Active(active) if active.is_readable() => active,
            _ => return Err(StoreError::RecordNotFound(id.to_string())),
        };
        if active.record.is_expired_at(inner.clock.now()) {
            return Err(StoreError::RecordExpired(id.to_string()));
        }

        let raw = inner
            .bounded("load", inner.backend.load(id))
            .await?
            .ok_or_else(|| {
                warn!(record_id = %id, "live record missing from backend");
                StoreError::RecordNotFound(id.to_string())
            })?;
        let stored: StoredRecord = serde_json::from_slice(raw.bytes.expose())?;
        let ciphertext = STANDARD
            .decode(&stored.ciphertext_b64)
            .map_err(|e| CryptoError::Decryption(format!("ciphertext base64: {e}")))?;
        let plaintext = inner.crypto.decrypt(&active.key, &ciphertext)?;

        let mut record = active.record.clone();
        record.record_access();
        let envelope = encode_envelope(&record, stored.ciphertext_b64)?;
        inner
            .bounded(
                "save",
                inner.backend.save(
                    id,
                    RawRecord {
                        expires_at: record.expires_at(),
                        bytes: envelope,
                    },
                ),
            )
            .await?;
        active.record = record;
        inner.counters.gets.fetch_add(1, Ordering::Relaxed);

        debug!(record_id = %id, access_count = active.record.access_count(), "record read");
        Ok(plaintext)
    }

    pub async fn get_json<T: DeserializeOwned>(&self, id: &str) -> Result<T, StoreError> {
        let plaintext = self.get(id).await?;
        Ok(serde_json::from_slice(plaintext.expose())?)
    }

    /// Like [`Self::get`], but not-found and expired come back as `None`.
    pub async fn get_optional(&self, id: &str) -> Result<Option<Plaintext>, StoreError> {
        match self.get(id).await {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(e) if e.is_absent() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Metadata view of a live record; never touches the ciphertext.
    pub async fn record(&self, id: &str) -> Result<EphemeralRecord, StoreError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let slot = inner
            .slot(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        let guard = slot.lock().await;
        match &*guard {
            Slot::Active(active) if active.is_readable() => {
                if active.record.is_expired_at(inner.clock.now()) {
                    Err(StoreError::RecordExpired(id.to_string()))
                } else {
                    Ok(active.record.clone())
                }
            }
            _ => Err(StoreError::RecordNotFound(id.to_string())),
        }
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.ttl(id).await.is_some()
    }

    /// Remaining lifetime of a live record.
    pub async fn ttl(&self, id: &str) -> Option<Duration> {
        let inner = &self.inner;
        if inner.is_closed() {
            return None;
        }
        let slot = inner.slot(id)?;
        let guard = slot.lock().await;
        match &*guard {
            Slot::Active(active) if active.is_readable() => {
                active.record.remaining_at(inner.clock.now())
            }
            _ => None,
        }
    }

    /// Destroys a record and returns its certificate.
    ///
    /// Idempotent: a destroyed id returns the certificate it was issued. A
    /// record already past its expiry is certified `EXPIRED`, not `EXPLICIT`.
    pub async fn destroy(&self, id: &str) -> Result<DestructionCertificate, StoreError> {
        let inner = &self.inner;
        inner.ensure_open()?;
        let slot = inner
            .slot(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))?;
        let mut guard = slot.lock().await;
        inner.destroy_locked(id, &mut guard, None).await
    }

    /// Tombstone lookup. Falls back to the ledger for ids this process never saw.
    pub async fn certificate_for(
        &self,
        record_id: &str,
    ) -> Result<Option<DestructionCertificate>, StoreError> {
        let inner = &self.inner;
        if let Some(slot) = inner.slot(record_id) {
            return Ok(match &*slot.lock().await {
                Slot::Destroyed(tomb) => Some(tomb.cert.clone()),
                Slot::Active(_) => None,
            });
        }
        match &inner.ledger {
            Some(ledger) => Ok(ledger
                .find_by_resource(record_id)
                .await?
                .map(|entry| entry.certificate)),
            None => Ok(None),
        }
    }

    /// Runs one reaper pass now.
    pub async fn reap_expired(&self) -> Result<SweepReport, StoreError> {
        self.inner.ensure_open()?;
        Ok(self.inner.sweep().await)
    }

    pub fn stats(&self) -> StoreStats {
        let inner = &self.inner;
        let c = &inner.counters;
        StoreStats {
            active_records: c.active.load(Ordering::Relaxed),
            certificates_issued: inner
                .history
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len() as u64,
            attestation_enabled: inner.options.attestation,
            backend: inner.backend.name(),
            puts: c.puts.load(Ordering::Relaxed),
            gets: c.gets.load(Ordering::Relaxed),
            destroys: c.destroys.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
        }
    }

    /// Every certificate this store issued, newest first.
    pub fn list_certificates(&self) -> Vec<DestructionCertificate> {
        self.inner
            .history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    pub fn verify_certificate(&self, cert: &DestructionCertificate) -> Result<(), StoreError> {
        if !self.inner.options.attestation {
            return Err(AttestationError::Disabled.into());
        }
        Ok(self.inner.crypto.verify_certificate(cert)?)
    }

    /// `did:key` of the attestation key, if certificates are signed.
    pub fn signer_key_id(&self) -> Option<&str> {
        self.inner
            .options
            .attestation
            .then(|| self.inner.crypto.signer_key_id())
    }

    pub fn crypto(&self) -> &Arc<CryptoProvider> {
        &self.inner.crypto
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Stops the reaper, destroys what is still live (unless
    /// `destroy_on_close` is off) and closes the backend.
    ///
    /// Never fails; problems are collected in the report. Calling it again is a
    /// no-op that reports `already_closed`.
    pub async fn close(&self) -> CloseReport {
        let inner = &self.inner;
        let mut report = CloseReport::default();
        if inner.closed.swap(true, Ordering::SeqCst) {
            report.already_closed = true;
            return report;
        }

        if let Some(reaper) = self.reaper.lock().await.take() {
            if let Err(e) = reaper.stop().await {
                report.failures.push(CloseFailure {
                    resource_id: None,
                    error: format!("reaper task: {e}"),
                });
            }
        }

        if inner.options.destroy_on_close {
            for (id, slot) in inner.snapshot_slots() {
                let mut guard = slot.lock().await;
                let pending = match &*guard {
                    Slot::Destroyed(tomb) if !tomb.ledger_pending => continue,
                    Slot::Destroyed(_) => true,
                    Slot::Active(_) => false,
                };
                match inner.destroy_locked(&id, &mut guard, None).await {
                    Ok(_) if pending => {}
                    Ok(_) => report.destroyed += 1,
                    Err(e) => {
                        warn!(record_id = %id, error = %e, "failed to destroy record on close");
                        report.failures.push(CloseFailure {
                            resource_id: Some(id),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if let Err(e) = inner.bounded("close", inner.backend.close()).await {
            report.failures.push(CloseFailure {
                resource_id: None,
                error: format!("backend close: {e}"),
            });
        }

        info!(
            destroyed = report.destroyed,
            failures = report.failures.len(),
            "ephemeral store closed"
        );
        report
    }
}

impl StoreInner {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn slot(&self, id: &str) -> Option<SlotRef> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn snapshot_slots(&self) -> Vec<(String, SlotRef)> {
        self.slots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, slot)| (id.clone(), slot.clone()))
            .collect()
    }

    async fn bounded<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        let after = self.options.backend_timeout;
        match tokio::time::timeout(after, fut).await {
            Ok(res) => res,
            Err(_) => Err(BackendError::Timeout {
                op,
                after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    async fn persist_new(
        &self,
        key: &KeyHandle,
        data: &[u8],
        ttl: Duration,
        opts: PutOptions,
    ) -> Result<EphemeralRecord, StoreError> {
        let record = EphemeralRecord::new(
            Uuid::new_v4().to_string(),
            key.classification(),
            key.id().to_string(),
            self.clock.now(),
            ttl,
            opts.metadata,
        )?;
        let ciphertext = self.crypto.encrypt(key, data)?;
        let envelope = encode_envelope(&record, STANDARD.encode(ciphertext))?;
        self.bounded(
            "save",
            self.backend.save(
                record.id(),
                RawRecord {
                    expires_at: record.expires_at(),
                    bytes: envelope,
                },
            ),
        )
        .await?;
        Ok(record)
    }

    /// Shared by destroy, the reaper and close. Caller holds the slot lock.
    ///
    /// The key goes first. If the backend delete then fails the slot stays
    /// ACTIVE but shredded: unreadable, and retried on the next destroy or sweep.
    /// A tombstone whose ledger append failed is retried the same way.
    async fn destroy_locked(
        &self,
        id: &str,
        slot: &mut Slot,
        method: Option<DestructionMethod>,
    ) -> Result<DestructionCertificate, StoreError> {
        let active = match slot {
            Slot::Destroyed(tomb) => {
                self.flush_to_ledger(tomb).await?;
                return Ok(tomb.cert.clone());
            }
            Slot::Active(active) => active,
        };

        let method = method.unwrap_or(if active.record.is_expired_at(self.clock.now()) {
            DestructionMethod::Expired
        } else {
            DestructionMethod::Explicit
        });

        if active.shredded_at.is_none() {
            match self.crypto.destroy_key(&active.key) {
                Ok(shred) if !shred.zeroized => {
                    warn!(record_id = %id, "record key did not read back as zero");
                }
                Ok(_) => {}
                Err(CryptoError::KeyNotFound(_)) => {
                    debug!(record_id = %id, "record key already gone");
                }
                Err(e) => return Err(e.into()),
            }
            active.shredded_at = Some(self.clock.now());
            self.counters.active.fetch_sub(1, Ordering::Relaxed);
        }
        let destroyed_at = active.shredded_at.unwrap_or_else(|| self.clock.now());

        self.bounded("delete", self.backend.delete(id)).await?;

        let backend = self.backend.name();
        let custody = ChainOfCustody::new()
            .record(
                CustodyAction::Stored,
                CUSTODY_ACTOR,
                Some(format!("record stored in {backend}")),
                active.record.created_at(),
            )
            .record(
                CustodyAction::KeyDestroyed,
                CUSTODY_ACTOR,
                Some("encryption key destroyed (crypto-shred)".to_string()),
                destroyed_at,
            )
            .record(
                CustodyAction::DataDeleted,
                CUSTODY_ACTOR,
                Some("record deleted from storage".to_string()),
                self.clock.now(),
            );
        let cert = if self.options.attestation {
            self.crypto
                .attest(id, ResourceKind::EphemeralRecord, method, destroyed_at)
        } else {
            DestructionCertificate::unsigned(id, ResourceKind::EphemeralRecord, method, destroyed_at)
        }
        .with_resource_info(Some(active.size_bytes), Some(backend.to_string()))
        .with_custody(custody);

        *slot = Slot::Destroyed(Tombstone {
            cert: cert.clone(),
            ledger_pending: self.ledger.is_some(),
        });
        self.history
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(cert.clone());
        match method {
            DestructionMethod::Expired => self.counters.expired.fetch_add(1, Ordering::Relaxed),
            _ => self.counters.destroys.fetch_add(1, Ordering::Relaxed),
        };

        info!(
            record_id = %id,
            method = %method,
            certificate_id = %cert.id(),
            signed = cert.is_signed(),
            "record destroyed"
        );

        if let Slot::Destroyed(tomb) = slot {
            self.flush_to_ledger(tomb).await?;
        }
        Ok(cert)
    }

    async fn flush_to_ledger(&self, tomb: &mut Tombstone) -> Result<(), StoreError> {
        if !tomb.ledger_pending {
            return Ok(());
        }
        if let Some(ledger) = &self.ledger {
            let entry = ledger.append(&tomb.cert).await?;
            debug!(certificate_id = %tomb.cert.id(), seq = entry.seq, "certificate appended to ledger");
        }
        tomb.ledger_pending = false;
        Ok(())
    }

    /// One reaper pass: expire overdue records, then purge backend entries
    /// nobody owns any more (their keys died with an earlier process).
    pub(crate) async fn sweep(&self) -> SweepReport {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for (id, slot) in self.snapshot_slots() {
            let mut guard = slot.lock().await;
            let pending = match &*guard {
                Slot::Active(active) if active.record.is_expired_at(now) => false,
                Slot::Destroyed(tomb) if tomb.ledger_pending => true,
                _ => continue,
            };
            match self
                .destroy_locked(&id, &mut guard, Some(DestructionMethod::Expired))
                .await
            {
                Ok(_) if pending => {}
                Ok(_) => report.destroyed += 1,
                Err(e) => {
                    report.failures += 1;
                    warn!(record_id = %id, error = %e, "failed to reap expired record");
                }
            }
        }

        match self
            .bounded("scan_expired", self.backend.scan_expired(now))
            .await
        {
            Ok(ids) => {
                for id in ids {
                    if self.slot(&id).is_some() {
                        continue;
                    }
                    match self.bounded("delete", self.backend.delete(&id)).await {
                        Ok(()) => {
                            report.orphans_purged += 1;
                            debug!(record_id = %id, "purged orphaned backend entry");
                        }
                        Err(e) => {
                            report.failures += 1;
                            warn!(record_id = %id, error = %e, "failed to purge orphaned entry");
                        }
                    }
                }
            }
            Err(e) => {
                report.failures += 1;
                warn!(error = %e, "backend expiry scan failed");
            }
        }

        report
    }
}

fn encode_envelope(
    record: &EphemeralRecord,
    ciphertext_b64: String,
) -> Result<Sensitive<Vec<u8>>, StoreError> {
    let stored = StoredRecord {
        record: record.clone(),
        ciphertext_b64,
    };
    Ok(Sensitive(serde_json::to_vec(&stored)?))
}
