use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chrono::{DateTime, Utc};
use efsf_core::{
    DataClassification, DestructionCertificate, DestructionMethod, Plaintext, ResourceKind,
    Sensitive,
};
use rand::RngCore as _;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::attestation::{Attestor, CertificateVerifier};
use crate::error::{AttestationError, CryptoError};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;

/// Opaque reference to a key held by a [`CryptoProvider`]. Carries no key bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyHandle {
    id: String,
    classification: DataClassification,
}

impl KeyHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn classification(&self) -> DataClassification {
        self.classification
    }
}

/// Outcome of [`CryptoProvider::destroy_key`]. `destroyed_at` is taken after the
/// key bytes were overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDestruction {
    pub handle_id: String,
    pub zeroized: bool,
    pub destroyed_at: DateTime<Utc>,
}

/// Key bytes live on the heap so moving the slot in and out of the table never
/// leaves a stray copy behind.
struct KeyMaterial(Box<[u8; KEY_LEN]>);

impl KeyMaterial {
    fn generate() -> Self {
        let mut bytes = Box::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(bytes.as_mut_slice());
        Self(bytes)
    }

    fn cipher(&self) -> Result<Aes256Gcm, CryptoError> {
        Aes256Gcm::new_from_slice(self.0.as_slice())
            .map_err(|e| CryptoError::Encryption(format!("key init: {e}")))
    }

    fn wipe(&mut self) {
        self.0.as_mut_slice().zeroize();
    }

    fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.wipe();
    }
}

/// Owns every record key and the attestation identity.
///
/// Raw key bytes never leave this type. Once [`destroy_key`](Self::destroy_key)
/// returns, the key is gone for good: there is no escrow or recovery path.
pub struct CryptoProvider {
    keys: RwLock<HashMap<String, KeyMaterial>>,
    attestor: Attestor,
}

impl Default for CryptoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CryptoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoProvider")
            .field("keys", &self.key_count())
            .field("signer_key_id", &self.attestor.key_id())
            .finish()
    }
}

impl CryptoProvider {
    pub fn new() -> Self {
        Self::with_attestor(Attestor::generate())
    }

    pub fn with_attestor(attestor: Attestor) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            attestor,
        }
    }

    /// Uses a caller-held Ed25519 seed so certificates stay verifiable across restarts.
    pub fn from_signing_seed(seed: &[u8; 32]) -> Self {
        Self::with_attestor(Attestor::from_seed(seed))
    }

    pub fn generate_key(&self, classification: DataClassification) -> KeyHandle {
        let id = Uuid::new_v4().to_string();
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), KeyMaterial::generate());
        debug!(key_id = %id, %classification, "generated record key");
        KeyHandle { id, classification }
    }

    /// AES-256-GCM with a fresh random nonce. Output is `nonce || ciphertext || tag`,
    /// authenticated against the handle id.
    pub fn encrypt(&self, handle: &KeyHandle, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = {
            let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
            keys.get(&handle.id)
                .ok_or_else(|| CryptoError::KeyNotFound(handle.id.clone()))?
                .cipher()?
        };

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad: handle.id.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Encryption("aead encrypt failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, handle: &KeyHandle, data: &[u8]) -> Result<Plaintext, CryptoError> {
        let cipher = {
            let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
            keys.get(&handle.id)
                .ok_or_else(|| CryptoError::KeyNotFound(handle.id.clone()))?
                .cipher()
                .map_err(|e| CryptoError::Decryption(e.to_string()))?
        };

        if data.len() < NONCE_LEN {
            return Err(CryptoError::Decryption("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: handle.id.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Decryption("aead decrypt failed".to_string()))?;
        Ok(Sensitive(Zeroizing::new(plaintext)))
    }

    /// Overwrites the key with zeros and forgets it. Synchronous: the returned
    /// `destroyed_at` is the attestable destruction instant.
    pub fn destroy_key(&self, handle: &KeyHandle) -> Result<KeyDestruction, CryptoError> {
        let material = self.take_wiped(&handle.id)?;
        let zeroized = material.is_zeroed();
        drop(material);
        debug!(key_id = %handle.id, zeroized, "destroyed record key");
        Ok(KeyDestruction {
            handle_id: handle.id.clone(),
            zeroized,
            destroyed_at: Utc::now(),
        })
    }

    fn take_wiped(&self, id: &str) -> Result<KeyMaterial, CryptoError> {
        let mut material = self
            .keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| CryptoError::KeyNotFound(id.to_string()))?;
        material.wipe();
        Ok(material)
    }

    /// Shreds every key this provider holds. Returns how many were destroyed.
    pub fn destroy_all_keys(&self) -> usize {
        let drained: Vec<(String, KeyMaterial)> = self
            .keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        let n = drained.len();
        for (_, mut material) in drained {
            material.wipe();
        }
        n
    }

    pub fn key_count(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn has_key(&self, handle: &KeyHandle) -> bool {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&handle.id)
    }

    pub fn signer_key_id(&self) -> &str {
        self.attestor.key_id()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.attestor.public_key_bytes()
    }

    pub fn verifier(&self) -> CertificateVerifier {
        self.attestor.verifier()
    }

    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.attestor.sign(payload)
    }

    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        self.attestor.verify(payload, signature)
    }

    /// Issues a signed certificate for a destruction that already happened.
    pub fn attest(
        &self,
        resource_id: &str,
        kind: ResourceKind,
        method: DestructionMethod,
        destroyed_at: DateTime<Utc>,
    ) -> DestructionCertificate {
        self.attestor.attest(resource_id, kind, method, destroyed_at)
    }

    pub fn verify_certificate(&self, cert: &DestructionCertificate) -> Result<(), AttestationError> {
        self.attestor.verifier().verify_certificate(cert)
    }
}
