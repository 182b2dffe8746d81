//! Snapshot/project/rollback protocol for optimistic mutations.
//!
//! A mutation that should appear instantaneous runs through a
//! `CacheTransaction`:
//!
//! 1. `begin` cancels in-flight fetches for every touched key, then
//!    snapshots current values
//! 2. `stage` writes locally-computed projections into the cache
//! 3. the remote call is awaited
//! 4. `commit` on success discards the snapshots; `rollback` on failure
//!    restores them verbatim
//!
//! Snapshots are taken at mutation start, so a second overlapping
//! transaction captures the first one's already-applied optimistic value.
//! If both fail, rolling back in reverse start order restores the true
//! pre-mutation state.

use tally_cache::CacheStore;
use tally_registry::QueryKey;
use tracing::debug;

/// A first-class snapshot of every cache key a mutation touches.
///
/// Owned by the in-flight mutation; consumed by exactly one of `commit`
/// or `rollback`.
#[derive(Debug)]
pub struct CacheTransaction<V> {
    snapshots: Vec<Snapshot<V>>,
}

/// One key's pre-mutation state: its value and whether it was already
/// flagged stale.
#[derive(Debug)]
struct Snapshot<V> {
    key: QueryKey,
    data: Option<V>,
    stale: bool,
}

impl<V> CacheTransaction<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Start a transaction over the given keys.
    ///
    /// Cancels any in-flight fetch per key first, so a slow GET cannot
    /// overwrite the optimistic value about to be staged, then snapshots
    /// whatever the cache holds right now.
    pub fn begin(store: &CacheStore<QueryKey, V>, keys: &[QueryKey]) -> Self {
        let mut snapshots = Vec::with_capacity(keys.len());
        for key in keys {
            store.cancel_in_flight(key);
            let entry = store.entry_snapshot(key);
            snapshots.push(Snapshot {
                key: key.clone(),
                stale: entry.as_ref().is_some_and(|e| e.stale),
                data: entry.and_then(|e| e.data),
            });
        }
        Self { snapshots }
    }

    /// Write a projected value for one touched key.
    ///
    /// The projector receives the current cached value and must apply the
    /// same derivation rules the remote system would.
    pub fn stage(
        &self,
        store: &CacheStore<QueryKey, V>,
        key: &QueryKey,
        projector: impl FnOnce(Option<V>) -> V,
    ) {
        debug_assert!(
            self.snapshots.iter().any(|s| s.key == *key),
            "staging a key that was not snapshotted: {key}"
        );
        store.set_with(key.clone(), projector);
    }

    /// Restore every snapshot verbatim, last captured first.
    ///
    /// An entry that was stale before the mutation comes back stale, so a
    /// failed mutation never extends the pre-mutation freshness window.
    pub fn rollback(self, store: &CacheStore<QueryKey, V>) {
        debug!(keys = self.snapshots.len(), "rolling back optimistic mutation");
        for snapshot in self.snapshots.into_iter().rev() {
            match snapshot.data {
                Some(value) => {
                    store.set(snapshot.key.clone(), value);
                    if snapshot.stale {
                        store.mark_stale(&snapshot.key);
                    }
                }
                None => store.clear(&snapshot.key),
            }
        }
    }

    /// Discard the snapshots; the staged values stand.
    pub fn commit(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_cache::CacheStore;
    use tally_registry::{QueryName, SessionMode};

    fn key(name: QueryName) -> QueryKey {
        QueryKey::new(name, SessionMode::Demo)
    }

    #[test]
    fn rollback_restores_pre_mutation_state() {
        let store: std::sync::Arc<CacheStore<QueryKey, i64>> = CacheStore::new();
        store.set(key(QueryName::Stash), 100);

        let txn = CacheTransaction::begin(&store, &[key(QueryName::Stash)]);
        txn.stage(&store, &key(QueryName::Stash), |_| 150);
        assert_eq!(store.get(&key(QueryName::Stash)), Some(150));

        txn.rollback(&store);
        assert_eq!(store.get(&key(QueryName::Stash)), Some(100));
    }

    #[test]
    fn rollback_restores_staleness_alongside_the_value() {
        let store: std::sync::Arc<CacheStore<QueryKey, i64>> = CacheStore::new();
        store.set(key(QueryName::Stash), 100);
        store.mark_stale(&key(QueryName::Stash));

        let txn = CacheTransaction::begin(&store, &[key(QueryName::Stash)]);
        txn.stage(&store, &key(QueryName::Stash), |_| 150);
        txn.rollback(&store);

        // The restored entry must not gain a fresh staleTime window.
        assert_eq!(store.get(&key(QueryName::Stash)), Some(100));
        assert!(store.is_stale(&key(QueryName::Stash), chrono::Duration::minutes(5)));
        assert!(!store.is_fresh(&key(QueryName::Stash), chrono::Duration::minutes(5)));
    }

    #[test]
    fn rollback_clears_keys_that_held_nothing() {
        let store: std::sync::Arc<CacheStore<QueryKey, i64>> = CacheStore::new();

        let txn = CacheTransaction::begin(&store, &[key(QueryName::Goals)]);
        txn.stage(&store, &key(QueryName::Goals), |_| 5);
        txn.rollback(&store);

        assert_eq!(store.get(&key(QueryName::Goals)), None);
    }

    #[test]
    fn commit_keeps_staged_values() {
        let store: std::sync::Arc<CacheStore<QueryKey, i64>> = CacheStore::new();
        store.set(key(QueryName::Stash), 1);

        let txn = CacheTransaction::begin(&store, &[key(QueryName::Stash)]);
        txn.stage(&store, &key(QueryName::Stash), |old| old.unwrap_or(0) + 1);
        txn.commit();

        assert_eq!(store.get(&key(QueryName::Stash)), Some(2));
    }

    #[test]
    fn begin_cancels_in_flight_fetches() {
        let store: std::sync::Arc<CacheStore<QueryKey, i64>> = CacheStore::new();
        let ticket = store.begin_fetch(&key(QueryName::Stash));

        let txn = CacheTransaction::begin(&store, &[key(QueryName::Stash)]);
        txn.stage(&store, &key(QueryName::Stash), |_| 10);

        // The stale GET must not clobber the optimistic value.
        assert!(!store.complete_fetch(&ticket, 999));
        assert_eq!(store.get(&key(QueryName::Stash)), Some(10));
        txn.commit();
    }

    #[test]
    fn overlapping_transactions_roll_back_in_reverse_order() {
        let store: std::sync::Arc<CacheStore<QueryKey, i64>> = CacheStore::new();
        let stash = key(QueryName::Stash);
        store.set(stash.clone(), 100);

        // First mutation applies its projection, then a second starts on
        // the same key before the first settles.
        let first = CacheTransaction::begin(&store, std::slice::from_ref(&stash));
        first.stage(&store, &stash, |_| 150);

        let second = CacheTransaction::begin(&store, std::slice::from_ref(&stash));
        second.stage(&store, &stash, |_| 175);

        // Both fail: the later mutation rolls back first, restoring the
        // first's optimistic value; then the first restores the original.
        second.rollback(&store);
        assert_eq!(store.get(&stash), Some(150));
        first.rollback(&store);
        assert_eq!(store.get(&stash), Some(100));
    }
}
