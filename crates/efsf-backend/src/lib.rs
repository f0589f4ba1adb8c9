//! Storage backends for ephemeral records.
//!
//! Backends only ever see ciphertext envelopes produced by the store; keys stay
//! in the crypto provider. Two implementations ship here:
//! - in-memory (tests, single process)
//! - one-file-per-record on local disk, wiped before unlink

mod file_backend;
mod memory_backend;
mod types;

pub use file_backend::{FileBackend, FileBackendOptions};
pub use memory_backend::InMemoryBackend;
pub use types::{
    BackendError, BackendKind, BackendOptions, RawRecord, StorageBackend, open_backend,
    validate_id,
};
