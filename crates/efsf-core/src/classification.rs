use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const HOUR: Duration = Duration::from_secs(3_600);
const DAY: Duration = Duration::from_secs(86_400);

const fn days(n: u64) -> Duration {
    Duration::from_secs(n * 86_400)
}

/// Policy tier for a record. Each tier bounds the lifetime a caller may request.
///
/// | tier             | min | default | max  |
/// |------------------|-----|---------|------|
/// | `Transient`      | 1s  | 5m      | 1h   |
/// | `ShortLived`     | 1h  | 1h      | 30d  |
/// | `RetentionBound` | 1d  | 30d     | 7y   |
/// | `Persistent`     | 1y  | 365d    | 10y  |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataClassification {
    /// Session tokens, OTPs, scratch values.
    #[default]
    Transient,
    /// Carts, pending uploads, in-flight transactions.
    ShortLived,
    /// Data under a mandated retention window (invoices, audit material).
    RetentionBound,
    /// Long holds that still need an end date.
    Persistent,
}

impl DataClassification {
    pub const ALL: [Self; 4] = [
        Self::Transient,
        Self::ShortLived,
        Self::RetentionBound,
        Self::Persistent,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "TRANSIENT",
            Self::ShortLived => "SHORT_LIVED",
            Self::RetentionBound => "RETENTION_BOUND",
            Self::Persistent => "PERSISTENT",
        }
    }

    pub const fn min_ttl(self) -> Duration {
        match self {
            Self::Transient => Duration::from_secs(1),
            Self::ShortLived => HOUR,
            Self::RetentionBound => DAY,
            Self::Persistent => days(365),
        }
    }

    pub const fn default_ttl(self) -> Duration {
        match self {
            Self::Transient => Duration::from_secs(5 * 60),
            Self::ShortLived => HOUR,
            Self::RetentionBound => days(30),
            Self::Persistent => days(365),
        }
    }

    pub const fn max_ttl(self) -> Duration {
        match self {
            Self::Transient => HOUR,
            Self::ShortLived => days(30),
            Self::RetentionBound => days(365 * 7),
            Self::Persistent => days(365 * 10),
        }
    }

    /// Checks a requested lifetime against this tier. Out-of-range values are
    /// rejected, never clamped.
    pub fn validate_ttl(self, ttl: Duration) -> Result<Duration, ConfigError> {
        if ttl > self.max_ttl() {
            return Err(ConfigError::TtlExceedsMaximum {
                classification: self,
                requested: ttl,
                max: self.max_ttl(),
            });
        }
        if ttl < self.min_ttl() {
            return Err(ConfigError::TtlBelowMinimum {
                classification: self,
                requested: ttl,
                min: self.min_ttl(),
            });
        }
        Ok(ttl)
    }

    /// Validates `requested`, falling back to the tier default when absent.
    pub fn resolve_ttl(self, requested: Option<Duration>) -> Result<Duration, ConfigError> {
        self.validate_ttl(requested.unwrap_or(self.default_ttl()))
    }
}

impl fmt::Display for DataClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataClassification {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == norm)
            .ok_or_else(|| ConfigError::UnknownClassification(s.to_string()))
    }
}
