//! Cryptographic layer of the ephemeral store.
//!
//! - one AES-256-GCM key per record, reachable only through an opaque [`KeyHandle`]
//! - key destruction overwrites the key bytes before the call returns (crypto-shredding)
//! - Ed25519 attestation over the canonical certificate encoding, with a `did:key` signer id

mod attestation;
mod error;
mod provider;

pub use attestation::{Attestor, CertificateVerifier, did_key_for_ed25519};
pub use error::{AttestationError, CryptoError};
pub use provider::{CryptoProvider, KEY_LEN, KeyDestruction, KeyHandle, NONCE_LEN};
