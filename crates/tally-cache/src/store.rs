//! Observable keyed cache with staleness and generation tracking.
//!
//! The `CacheStore` maintains:
//! - Cache entries indexed by query key
//! - Per-entry request generations for last-write-wins under races
//! - Staleness flags and fetch timestamps
//! - Subscriber counts and GC deadlines for eviction
//! - A broadcast channel notifying observers of every mutation

use std::hash::Hash;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Broadcast channel capacity for cache events.
/// Sized for bursts of invalidations after a full sync without lagging
/// slow subscribers.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// How an invalidated entry should be refetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefetchPolicy {
    /// Refetch now; observers are notified to re-run the query.
    Active,
    /// Mark stale only; the next access refetches lazily.
    None,
}

/// Event emitted to cache subscribers.
#[derive(Debug, Clone)]
pub enum CacheEvent<K> {
    /// An entry's data was written (fetch completion or optimistic write).
    Updated { key: K },
    /// An entry was invalidated with the given refetch policy.
    Invalidated { key: K, refetch: RefetchPolicy },
    /// An entry was evicted by garbage collection.
    Evicted { key: K },
}

/// A single cache entry.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    /// The cached value, if any fetch or write has completed.
    data: Option<V>,
    /// When the value was last written.
    fetched_at: Option<DateTime<Utc>>,
    /// Explicit staleness flag, set by invalidation.
    stale: bool,
    /// Request generation. Bumped on every write, cancellation, or new
    /// fetch, so an in-flight result from an older generation is ignored.
    generation: u64,
    /// Number of active observers.
    subscribers: usize,
    /// When this entry becomes eligible for eviction (set once the last
    /// observer is released).
    gc_deadline: Option<DateTime<Utc>>,
}

impl<V> Default for CacheEntry<V> {
    fn default() -> Self {
        Self {
            data: None,
            fetched_at: None,
            stale: false,
            generation: 0,
            subscribers: 0,
            gc_deadline: None,
        }
    }
}

/// Read-only view of an entry's bookkeeping.
#[derive(Debug, Clone)]
pub struct EntrySnapshot<V> {
    pub data: Option<V>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub stale: bool,
    pub generation: u64,
}

/// Token returned by `begin_fetch`, consumed by `complete_fetch`.
///
/// A completion is applied only while its ticket is still the newest
/// generation for the key.
#[derive(Debug, Clone)]
pub struct FetchTicket<K> {
    key: K,
    generation: u64,
}

impl<K> FetchTicket<K> {
    /// The key this ticket was issued for.
    pub fn key(&self) -> &K {
        &self.key
    }
}

/// Observable keyed cache.
///
/// Thread-safe and designed for concurrent access from multiple tasks.
/// All mutation goes through `set`/`invalidate`-style entry points so
/// subscriber notification is never skipped.
pub struct CacheStore<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    events_tx: broadcast::Sender<CacheEvent<K>>,
}

impl<K, V> CacheStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a new empty store.
    pub fn new() -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            entries: DashMap::new(),
            events_tx,
        })
    }

    /// Subscribe to cache events.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<K>> {
        self.events_tx.subscribe()
    }

    /// Send an event to subscribers, tolerating the no-subscriber case.
    fn broadcast(&self, event: CacheEvent<K>) {
        if self.events_tx.send(event).is_err() {
            trace!("no subscribers for cache event");
        }
    }

    /// Get the cached value for a key.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).and_then(|e| e.data.clone())
    }

    /// Get a read-only snapshot of an entry's bookkeeping.
    pub fn entry_snapshot(&self, key: &K) -> Option<EntrySnapshot<V>> {
        self.entries.get(key).map(|e| EntrySnapshot {
            data: e.data.clone(),
            fetched_at: e.fetched_at,
            stale: e.stale,
            generation: e.generation,
        })
    }

    /// Write a value directly.
    ///
    /// Bumps the generation: any in-flight fetch for this key is ignored
    /// when it completes, so the write cannot be clobbered by a slower,
    /// older response.
    pub fn set(&self, key: K, value: V) {
        {
            let mut entry = self.entries.entry(key.clone()).or_default();
            entry.data = Some(value);
            entry.fetched_at = Some(Utc::now());
            entry.stale = false;
            entry.generation += 1;
        }
        self.broadcast(CacheEvent::Updated { key });
    }

    /// Write a value derived from the current one.
    ///
    /// The updater receives the current value (`None` for an empty entry).
    /// Same generation semantics as `set`.
    pub fn set_with(&self, key: K, updater: impl FnOnce(Option<V>) -> V) {
        {
            let mut entry = self.entries.entry(key.clone()).or_default();
            let next = updater(entry.data.take());
            entry.data = Some(next);
            entry.fetched_at = Some(Utc::now());
            entry.stale = false;
            entry.generation += 1;
        }
        self.broadcast(CacheEvent::Updated { key });
    }

    /// Remove a key's value entirely, notifying subscribers.
    ///
    /// Used by rollback when the key held no value before the mutation.
    pub fn clear(&self, key: &K) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.data = None;
            entry.fetched_at = None;
            entry.stale = false;
            entry.generation += 1;
        }
        self.broadcast(CacheEvent::Updated { key: key.clone() });
    }

    /// Flag an entry stale without notifying refetchers.
    ///
    /// The data stays servable; the next access refetches.
    pub fn mark_stale(&self, key: &K) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.stale = true;
        }
        self.broadcast(CacheEvent::Invalidated {
            key: key.clone(),
            refetch: RefetchPolicy::None,
        });
    }

    /// Invalidate an entry.
    ///
    /// `RefetchPolicy::Active` broadcasts a refetch request to observers;
    /// `RefetchPolicy::None` is equivalent to `mark_stale`.
    pub fn invalidate(&self, key: &K, refetch: RefetchPolicy) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.stale = true;
        }
        self.broadcast(CacheEvent::Invalidated {
            key: key.clone(),
            refetch,
        });
    }

    /// Cancel any in-flight fetch for a key.
    ///
    /// Bumps the generation so an outstanding `FetchTicket` can no longer
    /// complete. Called before taking an optimistic snapshot, to avoid a
    /// race where an in-flight GET overwrites the about-to-be-applied
    /// optimistic value.
    pub fn cancel_in_flight(&self, key: &K) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.generation += 1;
        trace!("in-flight fetch cancelled, generation bumped");
    }

    /// Begin a fetch for a key, returning a completion ticket.
    pub fn begin_fetch(&self, key: &K) -> FetchTicket<K> {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.generation += 1;
        FetchTicket {
            key: key.clone(),
            generation: entry.generation,
        }
    }

    /// Complete a fetch.
    ///
    /// Returns `true` if the result was applied, `false` if the ticket's
    /// generation was superseded (a newer fetch, write, or cancellation
    /// happened in the meantime) and the result was discarded.
    pub fn complete_fetch(&self, ticket: &FetchTicket<K>, value: V) -> bool {
        let applied = {
            let mut entry = self.entries.entry(ticket.key.clone()).or_default();
            if entry.generation != ticket.generation {
                debug!("discarding superseded fetch result");
                false
            } else {
                entry.data = Some(value);
                entry.fetched_at = Some(Utc::now());
                entry.stale = false;
                true
            }
        };
        if applied {
            self.broadcast(CacheEvent::Updated {
                key: ticket.key.clone(),
            });
        }
        applied
    }

    /// Whether an entry has fresh data for the given stale time.
    ///
    /// Missing entries, empty entries, flagged entries, and entries older
    /// than `stale_time` are all not fresh.
    pub fn is_fresh(&self, key: &K, stale_time: Duration) -> bool {
        self.entries.get(key).is_some_and(|e| {
            !e.stale
                && e.data.is_some()
                && e.fetched_at
                    .is_some_and(|at| Utc::now() - at <= stale_time)
        })
    }

    /// Whether an entry exists and is flagged or aged past `stale_time`.
    pub fn is_stale(&self, key: &K, stale_time: Duration) -> bool {
        self.entries
            .get(key)
            .is_some_and(|e| e.stale || e.fetched_at.is_none_or(|at| Utc::now() - at > stale_time))
    }

    /// Register an observer for a key, cancelling any pending GC.
    pub fn retain(&self, key: &K) {
        let mut entry = self.entries.entry(key.clone()).or_default();
        entry.subscribers += 1;
        entry.gc_deadline = None;
    }

    /// Release an observer for a key.
    ///
    /// When the last observer goes away the entry gets a GC deadline of
    /// now + `gc_time`; `sweep` evicts it once the deadline passes.
    pub fn release(&self, key: &K, gc_time: Duration) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.subscribers = entry.subscribers.saturating_sub(1);
            if entry.subscribers == 0 {
                entry.gc_deadline = Some(Utc::now() + gc_time);
            }
        }
    }

    /// Evict entries whose GC deadline has passed with zero observers.
    ///
    /// Returns the number of evicted entries. Driven by the scheduler tick
    /// rather than per-entry timers so eviction stays deterministic.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|e| {
                e.value().subscribers == 0
                    && e.value().gc_deadline.is_some_and(|deadline| deadline <= now)
            })
            .map(|e| e.key().clone())
            .collect();

        let count = expired.len();
        for key in expired {
            self.entries.remove(&key);
            self.broadcast(CacheEvent::Evicted { key });
        }
        if count > 0 {
            debug!(evicted = count, "swept expired cache entries");
        }
        count
    }

    /// All resident keys.
    ///
    /// Used by invalidation to find every parameterized entry of a query.
    pub fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store has no resident entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a key has a resident entry.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<CacheStore<&'static str, i64>> {
        CacheStore::new()
    }

    #[test]
    fn set_and_get_round_trip() {
        let store = store();
        store.set("dashboard", 42);
        assert_eq!(store.get(&"dashboard"), Some(42));
        assert_eq!(store.get(&"stash"), None);
    }

    #[test]
    fn set_with_sees_previous_value() {
        let store = store();
        store.set("stash", 100);
        store.set_with("stash", |old| old.unwrap_or(0) + 50);
        assert_eq!(store.get(&"stash"), Some(150));
    }

    #[test]
    fn last_write_wins_under_race() {
        let store = store();
        // Fetch A starts before fetch B but resolves after it.
        let ticket_a = store.begin_fetch(&"dashboard");
        let ticket_b = store.begin_fetch(&"dashboard");

        assert!(store.complete_fetch(&ticket_b, 2));
        assert!(!store.complete_fetch(&ticket_a, 1));
        assert_eq!(store.get(&"dashboard"), Some(2));
    }

    #[test]
    fn write_supersedes_in_flight_fetch() {
        let store = store();
        let ticket = store.begin_fetch(&"stash");
        // Optimistic write lands while the fetch is still out.
        store.set("stash", 7);
        assert!(!store.complete_fetch(&ticket, 99));
        assert_eq!(store.get(&"stash"), Some(7));
    }

    #[test]
    fn cancel_in_flight_discards_completion() {
        let store = store();
        let ticket = store.begin_fetch(&"goals");
        store.cancel_in_flight(&"goals");
        assert!(!store.complete_fetch(&ticket, 3));
        assert_eq!(store.get(&"goals"), None);
    }

    #[test]
    fn invalidate_flags_stale_but_keeps_data() {
        let store = store();
        store.set("notes", 1);
        store.invalidate(&"notes", RefetchPolicy::None);
        assert_eq!(store.get(&"notes"), Some(1));
        assert!(store.is_stale(&"notes", Duration::minutes(5)));
        assert!(!store.is_fresh(&"notes", Duration::minutes(5)));
    }

    #[test]
    fn fetch_completion_clears_staleness() {
        let store = store();
        store.set("notes", 1);
        store.mark_stale(&"notes");
        let ticket = store.begin_fetch(&"notes");
        assert!(store.complete_fetch(&ticket, 2));
        assert!(store.is_fresh(&"notes", Duration::minutes(5)));
    }

    #[test]
    fn missing_entry_is_not_fresh() {
        let store = store();
        assert!(!store.is_fresh(&"dashboard", Duration::minutes(5)));
        assert!(!store.is_stale(&"dashboard", Duration::minutes(5)));
    }

    #[test]
    fn sweep_evicts_only_unwatched_expired_entries() {
        let store = store();
        store.set("a", 1);
        store.set("b", 2);
        store.retain(&"a");
        store.retain(&"b");

        // "a" released: eligible after its gc window. "b" stays watched.
        store.release(&"a", Duration::zero());
        let evicted = store.sweep(Utc::now() + Duration::seconds(1));

        assert_eq!(evicted, 1);
        assert!(!store.contains(&"a"));
        assert!(store.contains(&"b"));
    }

    #[test]
    fn retain_cancels_pending_gc() {
        let store = store();
        store.set("a", 1);
        store.retain(&"a");
        store.release(&"a", Duration::zero());
        store.retain(&"a");

        assert_eq!(store.sweep(Utc::now() + Duration::seconds(1)), 0);
        assert!(store.contains(&"a"));
    }

    #[tokio::test]
    async fn subscribers_see_updates_and_invalidations() {
        let store = store();
        let mut rx = store.subscribe();

        store.set("dashboard", 1);
        store.invalidate(&"dashboard", RefetchPolicy::Active);

        match rx.recv().await.unwrap() {
            CacheEvent::Updated { key } => assert_eq!(key, "dashboard"),
            other => panic!("expected Updated, got {other:?}"),
        }
        match rx.recv().await.unwrap() {
            CacheEvent::Invalidated { key, refetch } => {
                assert_eq!(key, "dashboard");
                assert_eq!(refetch, RefetchPolicy::Active);
            }
            other => panic!("expected Invalidated, got {other:?}"),
        }
    }
}
