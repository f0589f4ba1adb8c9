use std::fmt;

use zeroize::{Zeroize, Zeroizing};

/// Decrypted record contents handed back to callers. Wiped when dropped.
pub type Plaintext = Sensitive<Zeroizing<Vec<u8>>>;

/// A wrapper that prevents secrets from being accidentally logged via `Debug` / `Display`.
///
/// Record payloads, raw backend bytes and decrypted plaintext all travel in this wrapper.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Sensitive<T>(pub T);

impl<T> Sensitive<T> {
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn expose_mut(&mut self) -> &mut T {
        &mut self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sensitive<U> {
        Sensitive(f(self.0))
    }
}

impl<T: Zeroize> Zeroize for Sensitive<T> {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

impl<T> fmt::Debug for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Sensitive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
