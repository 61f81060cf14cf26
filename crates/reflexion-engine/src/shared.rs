//! Thread-safe handle for hosts that drive one engine from several threads.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::engine::ReflexionEngine;
use crate::error::ReflexionError;

/// Cloneable handle to a mutex-guarded [`ReflexionEngine`].
///
/// Each [`SharedEngine::with`] call holds the lock for its whole duration,
/// so mutations from different threads are serialized and never interleave.
/// The handle remembers which thread holds the lock, so a nested call from
/// that thread (an observer reaching back into the engine) is rejected
/// instead of deadlocking.
#[derive(Debug, Clone)]
pub struct SharedEngine {
    inner: Arc<Mutex<ReflexionEngine>>,
    holder: Arc<Mutex<Option<ThreadId>>>,
}

/// Clears the holder on drop, before the engine lock is released.
struct HolderGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for HolderGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SharedEngine {
    pub fn new(engine: ReflexionEngine) -> Self {
        SharedEngine {
            inner: Arc::new(Mutex::new(engine)),
            holder: Arc::new(Mutex::new(None)),
        }
    }

    /// Runs `f` with exclusive access to the engine.
    ///
    /// Returns [`ReflexionError::Reentrancy`] without running `f` when the
    /// calling thread is already inside `with` on this engine, e.g. from an
    /// observer notified by the outer call. Read-only calls are rejected too.
    ///
    /// A panic inside an earlier call (typically an observer) poisons the
    /// mutex; the engine's own bookkeeping is complete before observers run,
    /// so the poison is ignored.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut ReflexionEngine) -> R,
    ) -> Result<R, ReflexionError> {
        let current = thread::current().id();
        if *lock(&self.holder) == Some(current) {
            return Err(ReflexionError::Reentrancy);
        }
        let mut engine = lock(&self.inner);
        *lock(&self.holder) = Some(current);
        let _release = HolderGuard(&self.holder);
        Ok(f(&mut engine))
    }
}
