use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Chained digest used by the certificate ledger: `sha256(prev_hex || payload)`.
pub fn sha256_hex_concat(prev_hex: &str, payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hex.as_bytes());
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Drops sub-microsecond precision so timestamps survive JSON and the canonical encoding unchanged.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_hex_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn concat_digest_depends_on_prev() {
        let a = sha256_hex_concat(&"0".repeat(64), b"{}");
        let b = sha256_hex_concat(&"1".repeat(64), b"{}");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn truncation_keeps_micros() {
        let ts = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let t = truncate_to_micros(ts);
        assert_eq!(t.timestamp_subsec_nanos(), 123_456_000);
    }
}
