//! The ephemeral store: every record has a mandatory lifetime, and every
//! destruction produces a certificate that can be verified offline.
//!
//! Destruction is crypto-shredding first (the per-record key is overwritten),
//! then best-effort removal of the ciphertext from the backend.

mod error;
mod options;
mod reaper;
mod report;
mod store;

pub use error::StoreError;
pub use options::{PutOptions, StoreOptions};
pub use report::{CloseFailure, CloseReport, StoreStats, SweepReport};
pub use store::EphemeralStore;
