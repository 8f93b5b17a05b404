//! Poison-tolerant lock helpers
//!
//! Every lock in the broker is acquired through these helpers so a panic in
//! one request surfaces as an error on the next one instead of cascading
//! panics through unrelated queues.
//!
//! The `handle_*` helpers turn poisoning into an error for fallible
//! operations. The `recover_*` helpers are for infallible paths whose data
//! stays consistent under a panic; they log a warning and carry on with the
//! guard.

use std::sync::{LockResult, MutexGuard, PoisonError, RwLockReadGuard, RwLockWriteGuard};

/// Map a poisoned `Mutex::lock()` into a domain error
///
/// # Examples
/// ```
/// use std::sync::Mutex;
/// use fanout::core::sync::handle_mutex_poison;
/// use fanout::queue::QueueError;
///
/// let mutex = Mutex::new(42);
/// let guard = handle_mutex_poison(mutex.lock(), QueueError::internal).unwrap();
/// assert_eq!(*guard, 42);
/// ```
pub fn handle_mutex_poison<'a, T, E>(
    result: LockResult<MutexGuard<'a, T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<MutexGuard<'a, T>, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "mutex poisoned by a panic while the lock was held: {}",
            poison_err
        ))
    })
}

/// Map a poisoned `RwLock::read()` into a domain error
pub fn handle_rwlock_read<'a, T, E>(
    result: LockResult<RwLockReadGuard<'a, T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockReadGuard<'a, T>, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "rwlock poisoned by a panicking writer: {}",
            poison_err
        ))
    })
}

/// Map a poisoned `RwLock::write()` into a domain error
pub fn handle_rwlock_write<'a, T, E>(
    result: LockResult<RwLockWriteGuard<'a, T>>,
    error_constructor: impl FnOnce(String) -> E,
) -> Result<RwLockWriteGuard<'a, T>, E> {
    result.map_err(|poison_err| {
        error_constructor(format!(
            "rwlock poisoned by a panic while the lock was held: {}",
            poison_err
        ))
    })
}

fn recover<G>(result: LockResult<G>, kind: &str) -> G {
    result.unwrap_or_else(|poisoned: PoisonError<G>| {
        log::warn!("Recovering {} poisoned by an earlier panic", kind);
        poisoned.into_inner()
    })
}

/// Take a `Mutex` guard even if a previous holder panicked
pub fn recover_mutex<T>(result: LockResult<MutexGuard<'_, T>>) -> MutexGuard<'_, T> {
    recover(result, "mutex")
}

/// Take an `RwLock` read guard even if a previous writer panicked
pub fn recover_read<T>(result: LockResult<RwLockReadGuard<'_, T>>) -> RwLockReadGuard<'_, T> {
    recover(result, "rwlock")
}

/// Take an `RwLock` write guard even if a previous writer panicked
pub fn recover_write<T>(result: LockResult<RwLockWriteGuard<'_, T>>) -> RwLockWriteGuard<'_, T> {
    recover(result, "rwlock")
}
