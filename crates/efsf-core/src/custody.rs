//! Per-resource chain of custody carried on destruction certificates.
//!
//! Each entry hashes `action|actor|details|timestamp|previous_hash` with
//! SHA-256 and stores the previous entry's hash, so dropping, reordering or
//! editing an entry is detectable. The chain is informational: it is not part
//! of the signed canonical payload.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CustodyError;
use crate::util::{sha256_hex, truncate_to_micros};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CustodyAction {
    Stored,
    KeyDestroyed,
    DataDeleted,
    ScopeEntered,
    CleanupRun,
    BuffersWiped,
}

impl CustodyAction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "STORED",
            Self::KeyDestroyed => "KEY_DESTROYED",
            Self::DataDeleted => "DATA_DELETED",
            Self::ScopeEntered => "SCOPE_ENTERED",
            Self::CleanupRun => "CLEANUP_RUN",
            Self::BuffersWiped => "BUFFERS_WIPED",
        }
    }
}

impl fmt::Display for CustodyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustodyEntry {
    pub action: CustodyAction,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_hash: Option<String>,
    pub hash: String,
}

impl CustodyEntry {
    fn digest(&self) -> String {
        let input = format!(
            "{}|{}|{}|{}|{}",
            self.action,
            self.actor,
            self.details.as_deref().unwrap_or(""),
            self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.previous_hash.as_deref().unwrap_or(""),
        );
        sha256_hex(input.as_bytes())
    }
}

/// Ordered, hash-linked custody log for one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainOfCustody {
    entries: Vec<CustodyEntry>,
}

impl ChainOfCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        mut self,
        action: CustodyAction,
        actor: &str,
        details: Option<String>,
        at: DateTime<Utc>,
    ) -> Self {
        let mut entry = CustodyEntry {
            action,
            actor: actor.to_string(),
            details,
            timestamp: truncate_to_micros(at),
            previous_hash: self.entries.last().map(|e| e.hash.clone()),
            hash: String::new(),
        };
        entry.hash = entry.digest();
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[CustodyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recomputes every hash and checks each link to its predecessor.
    pub fn verify(&self) -> Result<(), CustodyError> {
        let mut prev: Option<&str> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.previous_hash.as_deref() != prev {
                return Err(CustodyError::BrokenLink { index });
            }
            if entry.digest() != entry.hash {
                return Err(CustodyError::HashMismatch { index });
            }
            prev = Some(&entry.hash);
        }
        Ok(())
    }
}
