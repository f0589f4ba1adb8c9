use efsf_backend::BackendError;
use efsf_core::ConfigError;
use efsf_crypto::{AttestationError, CryptoError};
use efsf_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    RecordNotFound(String),
    #[error("record expired: {0}")]
    RecordExpired(String),
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("attestation error: {0}")]
    Attestation(#[from] AttestationError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Not-found and expired both mean "no readable secret under this id".
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::RecordNotFound(_) | Self::RecordExpired(_))
    }
}
