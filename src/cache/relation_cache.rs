//! Batched relation fetches, keyed by (source entity type, relation name)
//!
//! Each entry is a [`Deferred`]: a single-flight slot that is empty while its
//! fetch runs and settles exactly once. The fetching caller holds the slot's
//! lock for the whole fetch, so any other requester of the same key blocks on
//! the slot and then reads the shared outcome instead of querying again.
//!
//! Lock order is map then slot only when the slot is brand new (and therefore
//! uncontended). A caller waiting on an existing slot has already released the
//! map lock, which lets the fetching caller merge rows and invalidate other
//! entries while it works.

use super::lock;
use crate::error::{ErrorContext, OrmCode, OrmError};
use may::sync::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Outcome of a relation fetch
pub type Settled<T> = Result<Arc<T>, OrmError>;

/// Target ids touched by an owned-side fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnedBatch {
    pub ids: Vec<String>,
}

/// Result of an inverse-side fetch
///
/// Rows are referenced by id only; readers always go back through the
/// [`EntityCache`](super::EntityCache) so deleted rows drop out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InverseBatch {
    pub ids: Vec<String>,
    pub by_source: BTreeMap<String, Vec<String>>,
}

impl InverseBatch {
    pub fn targets_of(&self, source_id: &str) -> &[String] {
        self.by_source.get(source_id).map_or(&[], Vec::as_slice)
    }
}

/// Single-flight slot
#[derive(Debug)]
pub struct Deferred<T> {
    slot: Mutex<Option<Settled<T>>>,
}

impl<T> Deferred<T> {
    fn pending() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// A slot that is already settled
    pub fn settled(outcome: Settled<T>) -> Self {
        Self {
            slot: Mutex::new(Some(outcome)),
        }
    }

    /// Block until the fetch holding this slot finishes and return its outcome
    pub fn wait(&self) -> Settled<T> {
        lock(&self.slot).clone().unwrap_or_else(|| {
            Err(OrmError::new(
                OrmCode::RelationFetchAbandoned,
                ErrorContext::new("resolve-relation"),
            ))
        })
    }

    /// Settled without blocking; `false` while the fetch is running
    pub fn is_settled(&self) -> bool {
        match self.slot.try_lock() {
            Ok(guard) => guard.is_some(),
            Err(_) => false,
        }
    }
}

type Key = (String, String);

#[derive(Debug)]
pub struct RelationCache<T> {
    entries: Mutex<BTreeMap<Key, Option<Arc<Deferred<T>>>>>,
}

impl<T> Default for RelationCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }
}

fn key(entity: &str, relation: &str) -> Key {
    (entity.to_string(), relation.to_string())
}

impl<T> RelationCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current entry; `None` when never fetched or invalidated
    pub fn find(&self, entity: &str, relation: &str) -> Option<Arc<Deferred<T>>> {
        lock(&self.entries)
            .get(&key(entity, relation))
            .cloned()
            .flatten()
    }

    pub fn overwrite(&self, entity: &str, relation: &str, deferred: Arc<Deferred<T>>) {
        lock(&self.entries).insert(key(entity, relation), Some(deferred));
    }

    /// Return the cached outcome for (`entity`, `relation`), running `fetch`
    /// only when there is none
    ///
    /// The second element is `true` when no fetch ran. `fetch` may touch the
    /// entity cache and invalidate other entries of this cache, but must not
    /// request the same key again.
    pub fn get_or_fetch<F>(&self, entity: &str, relation: &str, fetch: F) -> (Settled<T>, bool)
    where
        F: FnOnce() -> Result<T, OrmError>,
    {
        let mut entries = lock(&self.entries);
        let k = key(entity, relation);
        if let Some(Some(existing)) = entries.get(&k) {
            let existing = Arc::clone(existing);
            drop(entries);
            return (existing.wait(), true);
        }

        let deferred = Arc::new(Deferred::pending());
        let mut slot = lock(&deferred.slot);
        entries.insert(k, Some(Arc::clone(&deferred)));
        drop(entries);

        let outcome = fetch().map(Arc::new);
        *slot = Some(outcome.clone());
        (outcome, false)
    }

    /// Drop every entry whose source is `entity`
    pub fn invalidate_for_entity(&self, entity: &str) {
        lock(&self.entries).retain(|(source, _), _| source != entity);
    }

    /// Clear matching entries, keeping their keys
    pub fn invalidate_by_condition<P>(&self, predicate: P)
    where
        P: Fn(&str, &str) -> bool,
    {
        for ((source, relation), entry) in lock(&self.entries).iter_mut() {
            if entry.is_some() && predicate(source, relation) {
                *entry = None;
            }
        }
    }

    /// Block until every outstanding fetch has settled, successfully or not
    pub fn wait_for_all_resolved(&self) {
        let pending: Vec<Arc<Deferred<T>>> = lock(&self.entries)
            .values()
            .flatten()
            .cloned()
            .collect();
        for deferred in pending {
            let _ = deferred.wait();
        }
    }

    /// Number of keys, including invalidated ones
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn batch(ids: &[&str]) -> OwnedBatch {
        OwnedBatch {
            ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_second_request_is_served_from_cache() {
        let cache = RelationCache::new();
        let fetches = AtomicUsize::new(0);
        let fetch = || {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(batch(&["1"]))
        };
        let (first, hit) = cache.get_or_fetch("Call", "ship", fetch);
        assert!(!hit);
        let (second, hit) = cache.get_or_fetch("Call", "ship", || Ok(batch(&["2"])));
        assert!(hit);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(first.expect("fetched").ids, second.expect("cached").ids);
    }

    #[test]
    fn test_errors_are_shared() {
        let cache: RelationCache<OwnedBatch> = RelationCache::new();
        let (first, _) = cache.get_or_fetch("Call", "ship", || {
            Err(OrmError::new(OrmCode::Driver, ErrorContext::new("fetch")))
        });
        assert_eq!(first.unwrap_err().code(), OrmCode::Driver);
        let (second, hit) = cache.get_or_fetch("Call", "ship", || Ok(batch(&[])));
        assert!(hit);
        assert_eq!(second.unwrap_err().code(), OrmCode::Driver);
    }

    #[test]
    fn test_invalidate_by_condition_keeps_key() {
        let cache = RelationCache::new();
        let _ = cache.get_or_fetch("Ship", "calls", || Ok(batch(&[])));
        let _ = cache.get_or_fetch("Port", "ships", || Ok(batch(&[])));
        cache.invalidate_by_condition(|source, _| source == "Ship");
        assert!(cache.find("Ship", "calls").is_none());
        assert!(cache.find("Port", "ships").is_some());
        assert_eq!(cache.len(), 2);

        let (_, hit) = cache.get_or_fetch("Ship", "calls", || Ok(batch(&["9"])));
        assert!(!hit);
    }

    #[test]
    fn test_invalidate_for_entity_drops_keys() {
        let cache = RelationCache::new();
        let _ = cache.get_or_fetch("Ship", "calls", || Ok(batch(&[])));
        let _ = cache.get_or_fetch("Ship", "port", || Ok(batch(&[])));
        let _ = cache.get_or_fetch("Call", "ship", || Ok(batch(&[])));
        cache.invalidate_for_entity("Ship");
        assert_eq!(cache.len(), 1);
        assert!(cache.find("Call", "ship").is_some());
    }

    #[test]
    fn test_fetch_may_invalidate_other_entries() {
        let cache = RelationCache::new();
        let _ = cache.get_or_fetch("Ship", "calls", || Ok(batch(&[])));
        let (outcome, _) = cache.get_or_fetch("Call", "ship", || {
            cache.invalidate_for_entity("Ship");
            Ok(batch(&["1"]))
        });
        assert!(outcome.is_ok());
        assert!(cache.find("Ship", "calls").is_none());
        assert!(cache.find("Call", "ship").is_some_and(|d| d.is_settled()));
    }

    #[test]
    fn test_concurrent_requests_share_one_fetch() {
        let cache = Arc::new(RelationCache::new());
        let fetches = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let fetches = Arc::clone(&fetches);
                std::thread::spawn(move || {
                    let (outcome, _) = cache.get_or_fetch("Call", "loadOrders", || {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(20));
                        Ok(batch(&["1", "2"]))
                    });
                    outcome.expect("fetched").ids.len()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().expect("thread"), 2);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        cache.wait_for_all_resolved();
    }

    #[test]
    fn test_overwrite_and_settled() {
        let cache = RelationCache::new();
        cache.overwrite("Ship", "calls", Arc::new(Deferred::settled(Ok(Arc::new(batch(&["4"]))))));
        let (outcome, hit) = cache.get_or_fetch("Ship", "calls", || Ok(batch(&[])));
        assert!(hit);
        assert_eq!(outcome.expect("settled").ids, vec!["4".to_string()]);
    }

    #[test]
    fn test_inverse_targets_of() {
        let mut inverse = InverseBatch::default();
        inverse.by_source.insert("1".to_string(), vec!["10".to_string()]);
        assert_eq!(inverse.targets_of("1"), ["10".to_string()]);
        assert!(inverse.targets_of("2").is_empty());
    }
}
