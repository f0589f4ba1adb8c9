use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use efsf_core::{ChainOfCustody, CustodyAction, DestructionCertificate, DestructionMethod, ResourceKind};
use efsf_crypto::CryptoProvider;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;
use zeroize::Zeroize;

type Cleanup = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// Buffers the scope can wipe without knowing their type.
trait Wipe {
    /// False if the buffer was still borrowed and could not be wiped.
    fn wipe(&self) -> bool;
}

impl<T: Zeroize> Wipe for RefCell<T> {
    fn wipe(&self) -> bool {
        match self.try_borrow_mut() {
            Ok(mut value) => {
                value.zeroize();
                true
            }
            Err(_) => false,
        }
    }
}

/// Caller-side handle to a buffer owned by a [`SealedScope`].
///
/// Stays usable inside the scope; after exit it holds zeroized contents.
pub struct Tracked<T: Zeroize>(Rc<RefCell<T>>);

impl<T: Zeroize> Tracked<T> {
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.0.borrow())
    }
}

impl<T: Zeroize> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: Zeroize> fmt::Debug for Tracked<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Tracked(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupFailure {
    /// Registration order, starting at 0.
    pub index: usize,
    pub message: String,
    pub panicked: bool,
}

/// What happened when a scope closed.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeExit {
    pub scope_id: String,
    pub exited_at: DateTime<Utc>,
    pub callbacks_run: usize,
    pub callback_failures: Vec<CleanupFailure>,
    pub buffers_wiped: usize,
    /// Buffers still borrowed at exit; they could not be wiped.
    pub buffers_skipped: usize,
    pub certificate: Option<DestructionCertificate>,
}

impl ScopeExit {
    pub fn is_clean(&self) -> bool {
        self.callback_failures.is_empty() && self.buffers_skipped == 0
    }
}

#[derive(Default)]
struct ScopeState {
    buffers: Vec<Rc<dyn Wipe>>,
    callbacks: Vec<Cleanup>,
    exited: bool,
}

/// One sealed invocation. Not `Send`: it lives and dies on the entering thread.
pub struct SealedScope {
    id: String,
    entered_at: DateTime<Utc>,
    crypto: Option<Arc<CryptoProvider>>,
    state: RefCell<ScopeState>,
}

impl SealedScope {
    pub(crate) fn new(crypto: Option<Arc<CryptoProvider>>) -> Self {
        let id = format!("sealed-{}", Uuid::new_v4());
        debug!(scope_id = %id, "sealed scope entered");
        Self {
            id,
            entered_at: Utc::now(),
            crypto,
            state: RefCell::new(ScopeState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entered_at(&self) -> DateTime<Utc> {
        self.entered_at
    }

    /// Hands `value` to the scope; it is zeroized when the scope exits.
    pub fn track<T: Zeroize + 'static>(&self, value: T) -> Tracked<T> {
        let cell = Rc::new(RefCell::new(value));
        self.state.borrow_mut().buffers.push(cell.clone());
        Tracked(cell)
    }

    /// Registers a callback for exit. Callbacks run in registration order,
    /// before buffers are wiped; failures are recorded, never propagated.
    pub fn on_cleanup(&self, callback: impl FnOnce() -> anyhow::Result<()> + 'static) {
        self.state.borrow_mut().callbacks.push(Box::new(callback));
    }

    pub fn tracked_count(&self) -> usize {
        self.state.borrow().buffers.len()
    }

    pub fn cleanup_count(&self) -> usize {
        self.state.borrow().callbacks.len()
    }

    pub fn exit(self) -> ScopeExit {
        self.finish()
    }

    fn finish(&self) -> ScopeExit {
        let (buffers, callbacks) = {
            let mut state = self.state.borrow_mut();
            state.exited = true;
            (
                std::mem::take(&mut state.buffers),
                std::mem::take(&mut state.callbacks),
            )
        };

        let callbacks_run = callbacks.len();
        let mut callback_failures = Vec::new();
        for (index, callback) in callbacks.into_iter().enumerate() {
            let failure = match catch_unwind(AssertUnwindSafe(callback)) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(CleanupFailure {
                    index,
                    message: format!("{e:#}"),
                    panicked: false,
                }),
                Err(payload) => Some(CleanupFailure {
                    index,
                    message: panic_message(payload.as_ref()),
                    panicked: true,
                }),
            };
            if let Some(failure) = failure {
                warn!(
                    scope_id = %self.id,
                    index = failure.index,
                    panicked = failure.panicked,
                    error = %failure.message,
                    "sealed cleanup callback failed"
                );
                callback_failures.push(failure);
            }
        }

        let mut buffers_wiped = 0;
        let mut buffers_skipped = 0;
        for buffer in &buffers {
            if buffer.wipe() {
                buffers_wiped += 1;
            } else {
                buffers_skipped += 1;
            }
        }
        if buffers_skipped > 0 {
            warn!(scope_id = %self.id, buffers_skipped, "tracked buffers still borrowed at exit");
        }

        let exited_at = Utc::now();
        let certificate = self.crypto.as_ref().map(|crypto| {
            let custody = ChainOfCustody::new()
                .record(CustodyAction::ScopeEntered, "efsf-sealed", None, self.entered_at)
                .record(
                    CustodyAction::CleanupRun,
                    "efsf-sealed",
                    Some(format!(
                        "{callbacks_run} callbacks, {} failed",
                        callback_failures.len()
                    )),
                    exited_at,
                )
                .record(
                    CustodyAction::BuffersWiped,
                    "efsf-sealed",
                    Some(format!("{buffers_wiped} wiped, {buffers_skipped} skipped")),
                    exited_at,
                );
            crypto
                .attest(
                    &self.id,
                    ResourceKind::SealedScope,
                    DestructionMethod::SealExit,
                    exited_at,
                )
                .with_custody(custody)
        });

        debug!(
            scope_id = %self.id,
            callbacks_run,
            buffers_wiped,
            attested = certificate.is_some(),
            "sealed scope exited"
        );

        ScopeExit {
            scope_id: self.id.clone(),
            exited_at,
            callbacks_run,
            callback_failures,
            buffers_wiped,
            buffers_skipped,
            certificate,
        }
    }
}

impl Drop for SealedScope {
    fn drop(&mut self) {
        if self.state.borrow().exited {
            return;
        }
        let exit = self.finish();
        if std::thread::panicking() {
            warn!(scope_id = %exit.scope_id, buffers_wiped = exit.buffers_wiped, "sealed scope unwound by panic");
        }
    }
}

impl fmt::Debug for SealedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("SealedScope")
            .field("id", &self.id)
            .field("tracked", &state.buffers.len())
            .field("callbacks", &state.callbacks.len())
            .field("attested", &self.crypto.is_some())
            .finish()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}
