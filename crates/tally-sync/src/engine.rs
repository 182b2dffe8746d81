//! Effect resolution for settled mutations.
//!
//! Called exactly once per mutation settlement: looks the mutation kind up
//! in the effect table and drives the resulting invalidations and stale
//! marks through the cache store. Parameterized queries (month notes,
//! rollover status) have one cache entry per parameter; an effect against
//! the query name touches every resident entry of that name.

use std::sync::Arc;

use tracing::{debug, error};

use tally_cache::{CacheStore, RefetchPolicy};
use tally_registry::{EffectTable, MutationKind, QueryKey, QueryName, QueryRegistry, SessionMode};

/// Apply an invalidation to every resident entry of a query name.
///
/// Falls back to the query's unparameterized key when nothing is resident,
/// so observers still hear about the invalidation.
pub(crate) fn invalidate_by_name<V>(
    store: &CacheStore<QueryKey, V>,
    mode: SessionMode,
    name: QueryName,
    policy: RefetchPolicy,
) where
    V: Clone + Send + Sync + 'static,
{
    let mut touched = false;
    for key in store.keys() {
        if key.name() == name && key.mode() == mode {
            store.invalidate(&key, policy);
            touched = true;
        }
    }
    if !touched {
        store.invalidate(&QueryKey::new(name, mode), policy);
    }
}

/// Resolves mutation kinds into cache effects.
pub struct EffectEngine<V> {
    store: Arc<CacheStore<QueryKey, V>>,
    effects: Arc<EffectTable>,
    registry: Arc<QueryRegistry>,
    mode: SessionMode,
}

impl<V> EffectEngine<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<CacheStore<QueryKey, V>>,
        effects: Arc<EffectTable>,
        registry: Arc<QueryRegistry>,
        mode: SessionMode,
    ) -> Self {
        Self {
            store,
            effects,
            registry,
            mode,
        }
    }

    /// Propagate a settled mutation's effects.
    ///
    /// Unregistered targets are a config error: fatal in debug builds,
    /// logged and skipped in release so a missing registration never
    /// crashes the UI.
    pub fn settle(&self, kind: MutationKind) {
        let invalidate = self.effects.invalidation_targets(kind);
        let stale = self.effects.stale_targets(kind);
        debug!(
            mutation = %kind,
            invalidate = invalidate.len(),
            mark_stale = stale.len(),
            "propagating mutation effects"
        );

        for &name in invalidate {
            if !self.check_registered(kind, name) {
                continue;
            }
            invalidate_by_name(&self.store, self.mode, name, RefetchPolicy::Active);
        }
        for &name in stale {
            if !self.check_registered(kind, name) {
                continue;
            }
            invalidate_by_name(&self.store, self.mode, name, RefetchPolicy::None);
        }
    }

    fn check_registered(&self, kind: MutationKind, name: QueryName) -> bool {
        if self.registry.is_registered(name) {
            true
        } else {
            debug_assert!(false, "mutation {kind} targets unregistered query {name}");
            error!(mutation = %kind, query = %name, "effect targets unregistered query");
            false
        }
    }
}
