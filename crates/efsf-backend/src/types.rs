use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use efsf_core::Sensitive;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::file_backend::{FileBackend, FileBackendOptions};
use crate::memory_backend::InMemoryBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendOptions {
    pub kind: BackendKind,
    /// Required for `File` backend.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            data_dir: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("invalid record id")]
    InvalidId,
    #[error("storage backend {op} timed out after {after_ms}ms")]
    Timeout { op: &'static str, after_ms: u64 },
}

/// What a backend persists for one record: an opaque envelope plus the expiry
/// the backend needs to answer `scan_expired`.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub expires_at: DateTime<Utc>,
    pub bytes: Sensitive<Vec<u8>>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;
    async fn load(&self, id: &str) -> Result<Option<RawRecord>, BackendError>;
    async fn save(&self, id: &str, record: RawRecord) -> Result<(), BackendError>;
    /// Deleting an absent id is not an error.
    async fn delete(&self, id: &str) -> Result<(), BackendError>;
    /// Ids whose `expires_at <= now`.
    async fn scan_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, BackendError>;
    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

pub async fn open_backend(opts: BackendOptions) -> Result<Arc<dyn StorageBackend>, BackendError> {
    match opts.kind {
        BackendKind::Memory => Ok(Arc::new(InMemoryBackend::default())),
        BackendKind::File => {
            let dir = opts.data_dir.ok_or_else(|| {
                BackendError::Backend(
                    "missing data_dir for file backend (set EFSF_DATA_DIR)".to_string(),
                )
            })?;
            Ok(Arc::new(
                FileBackend::open(FileBackendOptions {
                    root_dir: dir.join("records"),
                })
                .await?,
            ))
        }
    }
}

pub fn validate_id(id: &str) -> Result<(), BackendError> {
    // Record ids are UUIDs; anything outside this set is a caller bug.
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if ok {
        Ok(())
    } else {
        Err(BackendError::InvalidId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_restricted() {
        assert!(validate_id("6f1c2a9e-1d7e-4a39-9d3c-0d6a1f2b3c4d").is_ok());
        assert!(validate_id("").is_err());
        assert!(validate_id("../etc/passwd").is_err());
        assert!(validate_id(&"a".repeat(129)).is_err());
    }

    #[tokio::test]
    async fn file_backend_requires_data_dir() {
        let err = open_backend(BackendOptions {
            kind: BackendKind::File,
            data_dir: None,
        })
        .await
        .err()
        .unwrap();
        assert!(err.to_string().contains("data_dir"));
    }
}
