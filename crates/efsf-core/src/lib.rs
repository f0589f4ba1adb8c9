//! Core types shared across the ephemeral secret store workspace.
//!
//! This crate stays free of async runtimes and crypto backends so the store,
//! the sealed-execution crate and the operator CLI can all depend on it.

pub mod certificate;
pub mod classification;
pub mod clock;
pub mod custody;
pub mod error;
pub mod record;
pub mod sensitive;
pub mod ttl;
pub mod util;

pub use certificate::{
    CANONICAL_DOMAIN_TAG, DestructionCertificate, DestructionMethod, ResourceKind,
    encode_canonical,
};
pub use classification::DataClassification;
pub use clock::{Clock, ManualClock, SystemClock};
pub use custody::{ChainOfCustody, CustodyAction, CustodyEntry};
pub use error::{ConfigError, CustodyError};
pub use record::EphemeralRecord;
pub use sensitive::{Plaintext, Sensitive};
pub use ttl::{format_ttl, parse_ttl};
