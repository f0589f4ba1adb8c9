//! Destruction certificates and their canonical signing encoding.
//!
//! The canonical encoding is the one byte-exact contract of the system. Layout:
//!
//! ```text
//! b"EFSF-DC-V1"
//! u32be len || resource_id
//! u32be len || method name
//! i64be     destroyed_at (unix microseconds)
//! u32be len || signer_key_id
//! ```
//!
//! Resource size, backend name and the chain of custody ride along in JSON but
//! stay outside the signed bytes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::custody::ChainOfCustody;
use crate::error::CustodyError;
use crate::util::truncate_to_micros;

pub const CANONICAL_DOMAIN_TAG: &[u8] = b"EFSF-DC-V1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DestructionMethod {
    /// Caller asked for it (`destroy`, or `close` with destroy-on-close).
    Explicit,
    /// Lifetime ran out.
    Expired,
    /// Sealed scope exited.
    SealExit,
}

impl DestructionMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "EXPLICIT",
            Self::Expired => "EXPIRED",
            Self::SealExit => "SEAL_EXIT",
        }
    }
}

impl fmt::Display for DestructionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    EphemeralRecord,
    SealedScope,
}

/// Proof that a resource's secret state was erased at `destroyed_at`.
///
/// Unsigned certificates are produced when attestation is disabled; they record
/// the event but prove nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestructionCertificate {
    id: String,
    resource_id: String,
    resource_kind: ResourceKind,
    method: DestructionMethod,
    destroyed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    signer_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resource_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    backend: Option<String>,
    #[serde(default, skip_serializing_if = "ChainOfCustody::is_empty")]
    custody: ChainOfCustody,
}

impl DestructionCertificate {
    pub fn unsigned(
        resource_id: impl Into<String>,
        resource_kind: ResourceKind,
        method: DestructionMethod,
        destroyed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            resource_id: resource_id.into(),
            resource_kind,
            method,
            destroyed_at: truncate_to_micros(destroyed_at),
            signature: None,
            signer_key_id: None,
            resource_size: None,
            backend: None,
            custody: ChainOfCustody::default(),
        }
    }

    pub fn with_resource_info(mut self, size_bytes: Option<u64>, backend: Option<String>) -> Self {
        self.resource_size = size_bytes;
        self.backend = backend;
        self
    }

    pub fn with_custody(mut self, custody: ChainOfCustody) -> Self {
        self.custody = custody;
        self
    }

    /// Attaches a base64 signature produced over [`Self::signing_payload_for`].
    pub fn with_signature(mut self, signer_key_id: String, signature_b64: String) -> Self {
        self.signer_key_id = Some(signer_key_id);
        self.signature = Some(signature_b64);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub fn resource_kind(&self) -> ResourceKind {
        self.resource_kind
    }

    pub fn method(&self) -> DestructionMethod {
        self.method
    }

    pub fn destroyed_at(&self) -> DateTime<Utc> {
        self.destroyed_at
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn signer_key_id(&self) -> Option<&str> {
        self.signer_key_id.as_deref()
    }

    pub fn resource_size(&self) -> Option<u64> {
        self.resource_size
    }

    pub fn backend(&self) -> Option<&str> {
        self.backend.as_deref()
    }

    pub fn custody(&self) -> &ChainOfCustody {
        &self.custody
    }

    pub fn verify_custody(&self) -> Result<(), CustodyError> {
        self.custody.verify()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some() && self.signer_key_id.is_some()
    }

    /// Bytes a signer with `signer_key_id` signs for this certificate.
    pub fn signing_payload_for(&self, signer_key_id: &str) -> Vec<u8> {
        encode_canonical(
            &self.resource_id,
            self.method,
            self.destroyed_at,
            signer_key_id,
        )
    }

    /// Bytes the recorded signature is expected to cover, if signed.
    pub fn signing_payload(&self) -> Option<Vec<u8>> {
        self.signer_key_id
            .as_deref()
            .map(|k| self.signing_payload_for(k))
    }
}

pub fn encode_canonical(
    resource_id: &str,
    method: DestructionMethod,
    destroyed_at: DateTime<Utc>,
    signer_key_id: &str,
) -> Vec<u8> {
    let method = method.as_str();
    let mut out = Vec::with_capacity(
        CANONICAL_DOMAIN_TAG.len() + 4 * 3 + 8 + resource_id.len() + method.len() + signer_key_id.len(),
    );
    out.extend_from_slice(CANONICAL_DOMAIN_TAG);
    put_field(&mut out, resource_id.as_bytes());
    put_field(&mut out, method.as_bytes());
    out.extend_from_slice(&destroyed_at.timestamp_micros().to_be_bytes());
    put_field(&mut out, signer_key_id.as_bytes());
    out
}

fn put_field(out: &mut Vec<u8>, bytes: &[u8]) {
    // Fields are ids and enum names; u32 lengths are never exceeded in practice.
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ts() -> DateTime<Utc> {
        DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap()
    }

    #[test]
    fn canonical_encoding_golden_vector() {
        let got = encode_canonical("r1", DestructionMethod::Explicit, ts(), "k");
        let expected = concat!(
            "454653462d44432d5631", // EFSF-DC-V1
            "00000002", "7231",     // r1
            "00000008", "4558504c49434954", // EXPLICIT
            "00060a24181e4000",     // 1_700_000_000_000_000 us
            "00000001", "6b",       // k
        );
        assert_eq!(hex::encode(got), expected);
    }

    #[test]
    fn encoding_is_length_prefixed_not_delimited() {
        let a = encode_canonical("ab", DestructionMethod::Expired, ts(), "c");
        let b = encode_canonical("a", DestructionMethod::Expired, ts(), "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn each_field_changes_the_payload() {
        let base = encode_canonical("r", DestructionMethod::Explicit, ts(), "k");
        assert_ne!(base, encode_canonical("r2", DestructionMethod::Explicit, ts(), "k"));
        assert_ne!(base, encode_canonical("r", DestructionMethod::SealExit, ts(), "k"));
        assert_ne!(
            base,
            encode_canonical("r", DestructionMethod::Explicit, ts() + chrono::Duration::microseconds(1), "k")
        );
        assert_ne!(base, encode_canonical("r", DestructionMethod::Explicit, ts(), "k2"));
    }

    #[test]
    fn json_round_trip_preserves_signing_payload() {
        let cert = DestructionCertificate::unsigned(
            "rec-9",
            ResourceKind::EphemeralRecord,
            DestructionMethod::Expired,
            DateTime::from_timestamp(1_700_000_123, 456_789_999).unwrap(),
        )
        .with_signature("did:key:zTest".to_string(), "c2ln".to_string());

        let json = serde_json::to_string(&cert).unwrap();
        assert!(json.contains("\"method\":\"EXPIRED\""));
        let back: DestructionCertificate = serde_json::from_str(&json).unwrap();
        assert_eq!(back.signing_payload(), cert.signing_payload());
        assert_eq!(back, cert);
    }

    #[test]
    fn custody_and_resource_info_stay_out_of_the_payload() {
        let bare = DestructionCertificate::unsigned(
            "rec-1",
            ResourceKind::EphemeralRecord,
            DestructionMethod::Explicit,
            ts(),
        );
        let custody = ChainOfCustody::new().record(
            crate::custody::CustodyAction::Stored,
            "efsf-store",
            None,
            ts(),
        );
        let rich = bare
            .clone()
            .with_resource_info(Some(42), Some("memory".into()))
            .with_custody(custody);
        assert_eq!(rich.signing_payload_for("k"), bare.signing_payload_for("k"));
        assert_eq!(rich.resource_size(), Some(42));
        assert_eq!(rich.backend(), Some("memory"));

        let json = serde_json::to_value(&rich).unwrap();
        assert_eq!(json["custody"][0]["action"], "STORED");
        let bare_json = serde_json::to_value(&bare).unwrap();
        assert!(bare_json.get("custody").is_none());
        let back: DestructionCertificate = serde_json::from_value(bare_json).unwrap();
        assert_eq!(back, bare);
    }

    #[test]
    fn unsigned_certificate_has_no_payload() {
        let cert = DestructionCertificate::unsigned(
            "scope-1",
            ResourceKind::SealedScope,
            DestructionMethod::SealExit,
            ts(),
        );
        assert!(!cert.is_signed());
        assert_eq!(cert.signing_payload(), None);
    }
}
