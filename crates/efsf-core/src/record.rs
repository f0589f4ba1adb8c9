use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classification::DataClassification;
use crate::error::ConfigError;

/// Metadata view of a stored secret. Never carries plaintext or key bytes.
///
/// Only `access_count` changes after creation, and only through a successful read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralRecord {
    id: String,
    classification: DataClassification,
    key_id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    access_count: u64,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

impl EphemeralRecord {
    pub fn new(
        id: String,
        classification: DataClassification,
        key_id: String,
        created_at: DateTime<Utc>,
        ttl: Duration,
        metadata: BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let delta = chrono::Duration::from_std(ttl)
            .map_err(|_| ConfigError::InvalidTtl(format!("{ttl:?} is out of range")))?;
        let expires_at = created_at
            .checked_add_signed(delta)
            .ok_or_else(|| ConfigError::InvalidTtl(format!("{ttl:?} is out of range")))?;
        if expires_at <= created_at {
            return Err(ConfigError::InvalidTtl(
                "ttl must be positive".to_string(),
            ));
        }

        Ok(Self {
            id,
            classification,
            key_id,
            created_at,
            expires_at,
            access_count: 0,
            metadata,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn classification(&self) -> DataClassification {
        self.classification
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    pub fn ttl(&self) -> Duration {
        (self.expires_at - self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Expired means `now >= expires_at`; the boundary instant is already dead.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Remaining lifetime, or `None` once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.is_expired_at(now) {
            return None;
        }
        (self.expires_at - now).to_std().ok()
    }

    pub fn record_access(&mut self) {
        self.access_count = self.access_count.saturating_add(1);
    }
}
