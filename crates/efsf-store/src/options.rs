use std::collections::BTreeMap;
use std::time::Duration;

use efsf_core::DataClassification;
use efsf_core::ttl::ttl_serde;
use efsf_ledger::LedgerOptions;
use serde::{Deserialize, Serialize};

/// Store-wide configuration. TTL fields accept strings like `"30s"` when
/// deserialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    pub default_classification: DataClassification,
    /// Falls back to the classification's default when unset.
    #[serde(with = "ttl_serde::option")]
    pub default_ttl: Option<Duration>,
    /// Sign destruction certificates. When off, certificates are issued unsigned.
    pub attestation: bool,
    /// Background reaper period; `None` leaves expiry to reads and explicit sweeps.
    #[serde(with = "ttl_serde::option")]
    pub reap_interval: Option<Duration>,
    #[serde(with = "ttl_serde")]
    pub backend_timeout: Duration,
    pub destroy_on_close: bool,
    pub ledger: Option<LedgerOptions>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            default_classification: DataClassification::Transient,
            default_ttl: None,
            attestation: true,
            reap_interval: Some(Duration::from_secs(1)),
            backend_timeout: Duration::from_secs(5),
            destroy_on_close: true,
            ledger: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutOptions {
    pub ttl: Option<Duration>,
    pub classification: Option<DataClassification>,
    pub metadata: BTreeMap<String, String>,
}

impl PutOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn classification(mut self, classification: DataClassification) -> Self {
        self.classification = Some(classification);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn options_parse_ttl_strings() {
        let opts: StoreOptions = serde_json::from_value(serde_json::json!({
            "default_classification": "SHORT_LIVED",
            "default_ttl": "15m",
            "reap_interval": "250ms",
            "backend_timeout": "2s",
        }))
        .unwrap();
        assert_eq!(opts.default_classification, DataClassification::ShortLived);
        assert_eq!(opts.default_ttl, Some(Duration::from_secs(900)));
        assert_eq!(opts.reap_interval, Some(Duration::from_millis(250)));
        assert_eq!(opts.backend_timeout, Duration::from_secs(2));
        assert!(opts.attestation);
        assert!(opts.destroy_on_close);
        assert!(opts.ledger.is_none());
    }

    #[test]
    fn bad_ttl_string_is_rejected() {
        let err = serde_json::from_value::<StoreOptions>(serde_json::json!({
            "default_ttl": "soon",
        }))
        .unwrap_err();
        assert!(err.to_string().contains("soon"), "{err}");
    }

    #[test]
    fn put_options_builder() {
        let opts = PutOptions::new()
            .ttl(Duration::from_secs(10))
            .classification(DataClassification::Transient)
            .metadata("purpose", "otp");
        assert_eq!(opts.ttl, Some(Duration::from_secs(10)));
        assert_eq!(opts.metadata.get("purpose").map(String::as_str), Some("otp"));
    }
}
