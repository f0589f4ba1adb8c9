use efsf_core::CustodyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error("decryption failed: {0}")]
    Decryption(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttestationError {
    #[error("certificate is not signed")]
    Unsigned,
    #[error("certificate signed by {actual}, expected {expected}")]
    SignerMismatch { expected: String, actual: String },
    #[error("certificate signature does not verify")]
    InvalidSignature,
    #[error("malformed attestation material: {0}")]
    Malformed(String),
    #[error("attestation is disabled for this store")]
    Disabled,
    #[error("chain of custody is broken: {0}")]
    Custody(#[from] CustodyError),
}
