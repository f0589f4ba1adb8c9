//! Tamper-evident certificate ledger: append-only log with hash chaining.
//!
//! Only certificates go in here. They carry ids, timestamps and signatures,
//! never secret material, so the ledger can outlive the store that wrote it.

mod store;

pub use store::{CertificateLedger, LedgerEntry, LedgerError, LedgerOptions};
