use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use zeroize::Zeroize as _;

use crate::types::{BackendError, RawRecord, StorageBackend, validate_id};

#[derive(Default)]
pub struct InMemoryBackend {
    map: Mutex<HashMap<String, RawRecord>>,
}

impl InMemoryBackend {
    pub async fn len(&self) -> usize {
        self.map.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.map.lock().await.is_empty()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, id: &str) -> Result<Option<RawRecord>, BackendError> {
        validate_id(id)?;
        Ok(self.map.lock().await.get(id).cloned())
    }

    async fn save(&self, id: &str, record: RawRecord) -> Result<(), BackendError> {
        validate_id(id)?;
        if let Some(mut old) = self.map.lock().await.insert(id.to_string(), record) {
            old.bytes.zeroize();
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), BackendError> {
        validate_id(id)?;
        if let Some(mut old) = self.map.lock().await.remove(id) {
            old.bytes.zeroize();
        }
        Ok(())
    }

    async fn scan_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>, BackendError> {
        Ok(self
            .map
            .lock()
            .await
            .iter()
            .filter(|(_, r)| r.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn close(&self) -> Result<(), BackendError> {
        for (_, mut r) in self.map.lock().await.drain() {
            r.bytes.zeroize();
        }
        Ok(())
    }
}
