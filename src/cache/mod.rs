//! Per-transaction caches
//!
//! All three structures are owned by one [`crate::session::Session`] and die
//! with it; nothing here is shared between transactions.

pub mod change_tracker;
pub mod entity_cache;
pub mod relation_cache;

pub use change_tracker::ChangeTracker;
pub use entity_cache::{EntityCache, SaveOutcome};
pub use relation_cache::{Deferred, InverseBatch, OwnedBatch, RelationCache};

use may::sync::{Mutex, MutexGuard};
use std::sync::PoisonError;

/// Lock ignoring poisoning: a panicked holder leaves data that is still
/// structurally valid for every map guarded here
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
