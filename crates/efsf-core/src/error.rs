use std::time::Duration;

use thiserror::Error;

use crate::classification::DataClassification;

/// Rejected store configuration or per-record lifetime policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("ttl {requested:?} exceeds the {classification} maximum of {max:?}")]
    TtlExceedsMaximum {
        classification: DataClassification,
        requested: Duration,
        max: Duration,
    },
    #[error("ttl {requested:?} is below the {classification} minimum of {min:?}")]
    TtlBelowMinimum {
        classification: DataClassification,
        requested: Duration,
        min: Duration,
    },
    #[error("invalid ttl: {0}")]
    InvalidTtl(String),
    #[error("unknown classification: {0}")]
    UnknownClassification(String),
}

/// A chain-of-custody entry that does not follow from its predecessor.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum CustodyError {
    #[error("custody entry {index} does not link to the previous entry")]
    BrokenLink { index: usize },
    #[error("custody entry {index} does not match its hash")]
    HashMismatch { index: usize },
}
