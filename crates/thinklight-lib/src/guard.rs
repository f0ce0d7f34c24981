//! Named exclusivity guards: at most one holder per name.
//!
//! The driver and the keeper each claim a name at construction and keep the
//! returned [`InstanceGuard`] for their whole lifetime; dropping the guard
//! releases the name. [`SystemLock`] enforces this machine-wide (a named
//! mutex on Windows), [`memory::LocalLock`] only within one lock registry so
//! tests can simulate contention without touching the OS.

use std::any::Any;
use std::fmt;

use crate::error::{BacklightError, Result};

/// Acquires named exclusivity. A second acquisition of a held name fails
/// immediately with [`BacklightError::AlreadyRunning`]; it never blocks.
pub trait InstanceLock: Send + Sync {
    fn acquire(&self, name: &str) -> Result<InstanceGuard>;
}

/// Proof of exclusive ownership of a name. Released on drop.
pub struct InstanceGuard {
    name: String,
    _held: Box<dyn Any + Send + Sync>,
}

impl InstanceGuard {
    fn new(name: &str, held: impl Any + Send + Sync) -> Self {
        InstanceGuard {
            name: name.to_string(),
            _held: Box::new(held),
        }
    }

    /// The name this guard holds.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for InstanceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceGuard")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ── System-wide lock ──

/// Machine-wide exclusivity backed by the `single-instance` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLock;

struct SystemHandle(#[allow(dead_code)] single_instance::SingleInstance);

// SAFETY: the wrapped mutex/socket handle is only created and dropped, never
// used in between, and closing it is valid from any thread.
unsafe impl Send for SystemHandle {}
unsafe impl Sync for SystemHandle {}

impl InstanceLock for SystemLock {
    fn acquire(&self, name: &str) -> Result<InstanceGuard> {
        let instance = single_instance::SingleInstance::new(name).map_err(|e| {
            BacklightError::DriverAccess(format!("instance lock {name}: {e}"))
        })?;
        if !instance.is_single() {
            return Err(BacklightError::AlreadyRunning(name.to_string()));
        }
        log::debug!("acquired instance lock {name}");
        Ok(InstanceGuard::new(name, SystemHandle(instance)))
    }
}

// ── In-memory lock for tests ──

/// Process-local lock registry.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod memory {
    use super::*;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex, PoisonError};

    /// Clones share one registry, so a clone handed to a second component
    /// sees names claimed through the first.
    #[derive(Debug, Default, Clone)]
    pub struct LocalLock {
        held: Arc<Mutex<HashSet<String>>>,
    }

    impl LocalLock {
        pub fn new() -> Self {
            Self::default()
        }

        /// Whether `name` is currently held by a live guard.
        pub fn is_held(&self, name: &str) -> bool {
            self.held
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(name)
        }
    }

    struct Release {
        held: Arc<Mutex<HashSet<String>>>,
        name: String,
    }

    impl Drop for Release {
        fn drop(&mut self) {
            self.held
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.name);
        }
    }

    impl InstanceLock for LocalLock {
        fn acquire(&self, name: &str) -> Result<InstanceGuard> {
            let inserted = self
                .held
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.to_string());
            if !inserted {
                return Err(BacklightError::AlreadyRunning(name.to_string()));
            }
            Ok(InstanceGuard::new(
                name,
                Release {
                    held: Arc::clone(&self.held),
                    name: name.to_string(),
                },
            ))
        }
    }
}
