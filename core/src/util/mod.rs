mod ring_bytes;

pub use ring_bytes::RingBytes;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a std mutex, recovering the guard if a previous holder panicked.
///
/// All mutexes in this crate guard plain data with no cross-field invariants, so a
/// poisoned lock is still safe to read and write.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
