use base64::Engine as _;
use bs58::Alphabet;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use efsf_core::{DestructionCertificate, DestructionMethod, ResourceKind};
use rand::RngCore as _;
use zeroize::Zeroizing;

use crate::error::AttestationError;

/// Ed25519 signing identity for destruction certificates.
///
/// The signer id is the `did:key` of the verifying key, so anyone holding a
/// certificate can tell which public key should verify it.
pub struct Attestor {
    signing_key: SigningKey,
    key_id: String,
}

impl Attestor {
    pub fn generate() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        rand::rng().fill_bytes(&mut seed[..]);
        Self::from_seed(&seed)
    }

    /// Rebuilds a stable identity from a 32-byte Ed25519 seed kept by the caller.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let key_id = did_key_for_ed25519(&signing_key.verifying_key());
        Self {
            signing_key,
            key_id,
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn verifier(&self) -> CertificateVerifier {
        CertificateVerifier {
            verifying_key: self.signing_key.verifying_key(),
            key_id: self.key_id.clone(),
        }
    }

    pub fn sign(&self, payload: &[u8]) -> Vec<u8> {
        self.signing_key.sign(payload).to_bytes().to_vec()
    }

    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        self.verifier().verify(payload, signature)
    }

    pub fn attest(
        &self,
        resource_id: &str,
        kind: ResourceKind,
        method: DestructionMethod,
        destroyed_at: DateTime<Utc>,
    ) -> DestructionCertificate {
        let cert = DestructionCertificate::unsigned(resource_id, kind, method, destroyed_at);
        let sig = self.sign(&cert.signing_payload_for(&self.key_id));
        cert.with_signature(
            self.key_id.clone(),
            base64::engine::general_purpose::STANDARD.encode(sig),
        )
    }
}

/// Verifies certificates with only the public half of an [`Attestor`].
#[derive(Debug, Clone)]
pub struct CertificateVerifier {
    verifying_key: VerifyingKey,
    key_id: String,
}

impl CertificateVerifier {
    pub fn from_public_key(bytes: &[u8]) -> Result<Self, AttestationError> {
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AttestationError::Malformed("expected 32-byte ed25519 key".to_string()))?;
        let verifying_key = VerifyingKey::from_bytes(&bytes)
            .map_err(|e| AttestationError::Malformed(format!("ed25519 public key: {e}")))?;
        Ok(Self {
            key_id: did_key_for_ed25519(&verifying_key),
            verifying_key,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let Ok(sig) = Signature::from_slice(signature) else {
            return false;
        };
        self.verifying_key.verify(payload, &sig).is_ok()
    }

    pub fn verify_certificate(&self, cert: &DestructionCertificate) -> Result<(), AttestationError> {
        let (Some(sig_b64), Some(signer)) = (cert.signature(), cert.signer_key_id()) else {
            return Err(AttestationError::Unsigned);
        };
        if signer != self.key_id {
            return Err(AttestationError::SignerMismatch {
                expected: self.key_id.clone(),
                actual: signer.to_string(),
            });
        }
        let sig = base64::engine::general_purpose::STANDARD
            .decode(sig_b64)
            .map_err(|e| AttestationError::Malformed(format!("signature base64: {e}")))?;
        if !self.verify(&cert.signing_payload_for(signer), &sig) {
            return Err(AttestationError::InvalidSignature);
        }
        cert.verify_custody()?;
        Ok(())
    }
}

/// Creates a `did:key` DID string for an Ed25519 public key.
///
/// did:key is multicodec + multibase(base58btc); the Ed25519 multicodec prefix is 0xED 0x01.
pub fn did_key_for_ed25519(verifying_key: &VerifyingKey) -> String {
    let mut bytes = [0u8; 34];
    bytes[0] = 0xED;
    bytes[1] = 0x01;
    bytes[2..].copy_from_slice(verifying_key.as_bytes());
    let encoded = bs58::encode(bytes)
        .with_alphabet(Alphabet::BITCOIN)
        .into_string();
    format!("did:key:z{encoded}")
}
