//! Sealed execution: a stack-bound scope that owns transient secret buffers.
//!
//! On every way out of the scope (normal return, early `?`, panic unwinding)
//! the registered cleanup callbacks run, every tracked buffer is zeroized and,
//! with attestation on, a signed `SEAL_EXIT` certificate is issued for the scope.

mod execution;
mod scope;

pub use execution::{Sealed, SealedError, SealedExecution, sealed};
pub use scope::{CleanupFailure, ScopeExit, SealedScope, Tracked};
