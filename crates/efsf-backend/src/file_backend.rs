use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use efsf_core::{Sensitive, util::sha256_hex};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt as _;
use tracing::warn;
use zeroize::Zeroizing;

use crate::types::{BackendError, RawRecord, StorageBackend, validate_id};

#[derive(Debug, Clone)]
pub struct FileBackendOptions {
    pub root_dir: PathBuf,
}

/// One JSON file per record, named by the sha256 of its id.
///
/// Deletes overwrite the file with zeros and sync before unlinking. That is as
/// far as a filesystem backend can go; journaling and SSD remapping are out of
/// reach, which is why the store shreds the record key first.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root_dir: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    id: String,
    expires_at: DateTime<Utc>,
    payload_b64: String,
}

impl FileBackend {
    pub async fn open(opts: FileBackendOptions) -> Result<Self, BackendError> {
        tokio::fs::create_dir_all(&opts.root_dir)
            .await
            .map_err(|e| BackendError::Backend(format!("create records dir error: {e}")))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = tokio::fs::set_permissions(&opts.root_dir, std::fs::Permissions::from_mode(0o700))
                .await;
        }
        Ok(Self {
            root_dir: opts.root_dir,
        })
    }

    fn path_for_id(&self, id: &str) -> Result<PathBuf, BackendError> {
        validate_id(id)?;
        let file = sha256_hex(id.as_bytes());
        Ok(self.root_dir.join(file).with_extension("json"))
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn load(&self, id: &str) -> Result<Option<RawRecord>, BackendError> {
        let path = self.path_for_id(id)?;
        let Some(rec) = read_record_file(&path).await? else {
            return Ok(None);
        };
        if rec.id != id {
            return Err(BackendError::Backend("record file id mismatch".to_string()));
        }
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&rec.payload_b64)
            .map_err(|e| BackendError::Backend(format!("payload base64 decode error: {e}")))?;
        Ok(Some(RawRecord {
            expires_at: rec.expires_at,
            bytes: Sensitive(bytes),
        }))
    }

    async fn save(&self, id: &str, record: RawRecord) -> Result<(), BackendError> {
        let path = self.path_for_id(id)?;
        let rec = RecordFile {
            id: id.to_string(),
            expires_at: record.expires_at,
            payload_b64: base64::engine::general_purpose::STANDARD.encode(record.bytes.expose()),
        };
        let bytes = Zeroizing::new(
            serde_json::to_vec(&rec)
                .map_err(|e| BackendError::Backend(format!("record json error: {e}")))?,
        );
        write_atomic(&path, &bytes).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        let path = self.path_for_id(id)?;
        if !path.exists() {
            return Ok(());
        }
        overwrite_with_zeros(&path).await?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| BackendError::Backend(format!("remove record error: {e}")))?;
        Ok(())
    }

    async fn scan_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, BackendError> {
        let mut dir = tokio::fs::read_dir(&self.root_dir)
            .await
            .map_err(|e| BackendError::Backend(format!("read records dir error: {e}")))?;
        let mut expired = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| BackendError::Backend(format!("read records dir error: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_record_file(&path).await {
                Ok(Some(rec)) if rec.expires_at <= now => expired.push(rec.id),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record file"),
            }
        }
        Ok(expired)
    }
}

async fn read_record_file(path: &Path) -> Result<Option<RecordFile>, BackendError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => Zeroizing::new(b),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BackendError::Backend(format!("read record error: {e}"))),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| BackendError::Backend(format!("record json decode error: {e}")))
}

async fn overwrite_with_zeros(path: &Path) -> Result<(), BackendError> {
    let len = tokio::fs::metadata(path)
        .await
        .map_err(|e| BackendError::Backend(format!("stat record error: {e}")))?
        .len();
    let mut f = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| BackendError::Backend(format!("open record for wipe error: {e}")))?;
    let zeros = vec![0u8; usize::try_from(len).unwrap_or(0)];
    f.write_all(&zeros)
        .await
        .map_err(|e| BackendError::Backend(format!("wipe record error: {e}")))?;
    f.sync_all()
        .await
        .map_err(|e| BackendError::Backend(format!("sync wiped record error: {e}")))?;
    Ok(())
}

/// Writes through an owner-only temp file, so the ciphertext is never
/// readable by others, not even between create and rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    let tmp = path.with_extension("tmp");
    // A tmp left by a crash keeps its old mode unless it is recreated.
    match tokio::fs::remove_file(&tmp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(BackendError::Backend(format!("remove stale tmp error: {e}"))),
    }
    {
        let mut opts = tokio::fs::OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        opts.mode(0o600);
        let mut f = opts
            .open(&tmp)
            .await
            .map_err(|e| BackendError::Backend(format!("create tmp error: {e}")))?;
        f.write_all(bytes)
            .await
            .map_err(|e| BackendError::Backend(format!("write tmp error: {e}")))?;
        f.flush()
            .await
            .map_err(|e| BackendError::Backend(format!("flush tmp error: {e}")))?;
    }
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| BackendError::Backend(format!("rename tmp error: {e}")))?;
    Ok(())
}
