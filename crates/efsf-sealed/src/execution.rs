use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use efsf_core::DestructionCertificate;
use efsf_crypto::CryptoProvider;

use crate::scope::{ScopeExit, SealedScope};

/// Factory for sealed scopes, optionally attesting each exit.
#[derive(Debug, Clone, Default)]
pub struct SealedExecution {
    crypto: Option<Arc<CryptoProvider>>,
}

impl SealedExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every scope exit yields a `SEAL_EXIT` certificate signed by `crypto`.
    pub fn with_attestation(crypto: Arc<CryptoProvider>) -> Self {
        Self {
            crypto: Some(crypto),
        }
    }

    pub fn attestation_enabled(&self) -> bool {
        self.crypto.is_some()
    }

    pub fn enter(&self) -> SealedScope {
        SealedScope::new(self.crypto.clone())
    }

    /// Runs `body` inside a fresh scope and exits the scope afterwards,
    /// whatever the body did. A panic in the body still wipes and cleans up
    /// while unwinding, then keeps propagating.
    pub fn run<T, E>(
        &self,
        body: impl FnOnce(&SealedScope) -> Result<T, E>,
    ) -> Result<Sealed<T>, SealedError<E>> {
        let scope = self.enter();
        let outcome = body(&scope);
        let exit = scope.exit();
        match outcome {
            Ok(value) => Ok(Sealed { value, exit }),
            Err(error) => Err(SealedError { error, exit }),
        }
    }
}

/// A body's return value together with the record of its scope's exit.
#[derive(Debug)]
pub struct Sealed<T> {
    pub value: T,
    pub exit: ScopeExit,
}

impl<T> Sealed<T> {
    pub fn certificate(&self) -> Option<&DestructionCertificate> {
        self.exit.certificate.as_ref()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// The body failed; the scope was still exited.
#[derive(Debug)]
pub struct SealedError<E> {
    pub error: E,
    pub exit: ScopeExit,
}

impl<E: fmt::Display> fmt::Display for SealedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sealed body failed in {}: {}", self.exit.scope_id, self.error)
    }
}

impl<E: StdError + 'static> StdError for SealedError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.error)
    }
}

/// Wraps `f` so that every call runs in its own fresh sealed scope.
pub fn sealed<A, T, E>(
    exec: SealedExecution,
    f: impl Fn(&SealedScope, A) -> Result<T, E>,
) -> impl Fn(A) -> Result<Sealed<T>, SealedError<E>> {
    move |arg| exec.run(|scope| f(scope, arg))
}
