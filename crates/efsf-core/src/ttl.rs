//! Human TTL strings (`"30m"`, `"2h"`, `"1500ms"`) are parsed here, at the edge.
//! Everything past this module works with [`Duration`] only.

use std::time::Duration;

use crate::error::ConfigError;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;
const WEEK: u64 = 7 * DAY;

/// Parses `<digits><unit>` where unit is one of `ms`, `s`, `m`, `h`, `d`, `w`.
///
/// Surrounding whitespace and unit case are ignored. Zero is rejected since a
/// record must outlive its own creation.
pub fn parse_ttl(input: &str) -> Result<Duration, ConfigError> {
    let s = input.trim().to_ascii_lowercase();
    if s.is_empty() {
        return Err(ConfigError::InvalidTtl("ttl cannot be empty".to_string()));
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(ConfigError::InvalidTtl(format!(
            "{input:?}: expected <number><unit>"
        )));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| ConfigError::InvalidTtl(format!("{input:?}: number out of range")))?;

    let ttl = match unit {
        "ms" => Some(Duration::from_millis(value)),
        "s" => Some(Duration::from_secs(value)),
        "m" => value.checked_mul(MINUTE).map(Duration::from_secs),
        "h" => value.checked_mul(HOUR).map(Duration::from_secs),
        "d" => value.checked_mul(DAY).map(Duration::from_secs),
        "w" => value.checked_mul(WEEK).map(Duration::from_secs),
        "" => {
            return Err(ConfigError::InvalidTtl(format!(
                "{input:?}: missing unit (ms, s, m, h, d or w)"
            )));
        }
        other => {
            return Err(ConfigError::InvalidTtl(format!(
                "{input:?}: unknown unit {other:?}"
            )));
        }
    }
    .ok_or_else(|| ConfigError::InvalidTtl(format!("{input:?}: overflows")))?;

    if ttl.is_zero() {
        return Err(ConfigError::InvalidTtl(format!("{input:?}: ttl must be positive")));
    }
    Ok(ttl)
}

/// Formats a duration with the largest unit that divides it exactly.
pub fn format_ttl(ttl: Duration) -> String {
    if ttl.subsec_nanos() != 0 || ttl.is_zero() {
        return format!("{}ms", ttl.as_millis());
    }
    let secs = ttl.as_secs();
    for (unit, size) in [("w", WEEK), ("d", DAY), ("h", HOUR), ("m", MINUTE)] {
        if secs % size == 0 {
            return format!("{}{unit}", secs / size);
        }
    }
    format!("{secs}s")
}

/// Serde adapter for TTL fields written as strings in config files.
pub mod ttl_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_ttl(*ttl))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_ttl(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(ttl: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
            match ttl {
                Some(ttl) => s.serialize_some(&super::super::format_ttl(*ttl)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
            Option::<String>::deserialize(d)?
                .map(|raw| super::super::parse_ttl(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
