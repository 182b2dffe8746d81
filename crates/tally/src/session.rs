//! Session construction and shared state.
//!
//! A session is built once at startup: it validates the static tables,
//! picks a data-access backend for its mode, and owns the cache store and
//! the gates every sync path shares. The UI layer holds one `Arc<Session>`
//! and calls the typed read/write entry points on it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

use tally_cache::{CacheEvent, CacheStore};
use tally_registry::{
    ConfigError, EffectTable, Page, PageMap, QueryKey, QueryRegistry, SessionMode,
};
use tally_remote::{DataAccess, DemoBackend, RemoteBackend};
use tally_sync::{
    EffectEngine, PageSyncCoordinator, PollExecutor, RateLimitGate, SyncError, SyncScheduler,
    VisibilityGate,
};

use crate::payload::Payload;

/// Startup configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// API base URL for live mode.
    pub base_url: String,
    /// Bearer token for live mode.
    pub token: String,
    /// Demo state file; in-memory only when unset.
    pub demo_storage: Option<PathBuf>,
    /// Background refresh interval.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.tally.app".to_string(),
            token: String::new(),
            demo_storage: None,
            poll_interval: Duration::from_secs(300),
        }
    }
}

/// One running session over a single backend.
pub struct Session {
    pub(crate) mode: SessionMode,
    pub(crate) store: Arc<CacheStore<QueryKey, Payload>>,
    pub(crate) registry: Arc<QueryRegistry>,
    pub(crate) backend: Arc<dyn DataAccess>,
    pub(crate) rate_gate: Arc<RateLimitGate>,
    pub(crate) effects: EffectEngine<Payload>,
    /// Outstanding fetches per key. A count, not a set: overlapping loads
    /// for one key must keep `is_loading` true until the last one lands.
    pub(crate) in_flight: DashMap<QueryKey, usize>,
    visibility: Arc<VisibilityGate>,
    coordinator: PageSyncCoordinator<Payload>,
    scheduler: Arc<SyncScheduler<Payload>>,
}

impl Session {
    /// Build a session, validating the static query graph first.
    ///
    /// A closure failure in the registry, effect table, or page map is a
    /// programmer error in the tables and aborts startup.
    pub fn new(mode: SessionMode, config: SessionConfig) -> Result<Self, ConfigError> {
        let registry = Arc::new(QueryRegistry::standard());
        let effect_table = Arc::new(EffectTable::standard());
        let pages = Arc::new(PageMap::standard());
        registry.validate_graph(&effect_table, &pages)?;

        let backend: Arc<dyn DataAccess> = match mode {
            SessionMode::Live => Arc::new(RemoteBackend::new(&config.base_url, &config.token)),
            SessionMode::Demo => match &config.demo_storage {
                Some(path) => Arc::new(DemoBackend::with_storage(path)),
                None => Arc::new(DemoBackend::new()),
            },
        };

        info!(%mode, "session starting");
        Ok(Self::with_backend(mode, config, registry, effect_table, pages, backend))
    }

    /// Build a session around an explicit backend (tests use this).
    pub fn with_backend(
        mode: SessionMode,
        config: SessionConfig,
        registry: Arc<QueryRegistry>,
        effect_table: Arc<EffectTable>,
        pages: Arc<PageMap>,
        backend: Arc<dyn DataAccess>,
    ) -> Self {
        let store: Arc<CacheStore<QueryKey, Payload>> = CacheStore::new();
        let rate_gate = Arc::new(RateLimitGate::new());
        let visibility = Arc::new(VisibilityGate::new());

        let effects = EffectEngine::new(
            Arc::clone(&store),
            Arc::clone(&effect_table),
            Arc::clone(&registry),
            mode,
        );
        let coordinator = PageSyncCoordinator::new(
            Arc::clone(&store),
            pages,
            Arc::clone(&registry),
            Arc::clone(&backend),
            Arc::clone(&rate_gate),
            mode,
        );
        let scheduler = Arc::new(SyncScheduler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&rate_gate),
            Arc::clone(&visibility),
            config.poll_interval,
        ));

        Self {
            mode,
            store,
            registry,
            backend,
            rate_gate,
            effects,
            in_flight: DashMap::new(),
            visibility,
            coordinator,
            scheduler,
        }
    }

    /// The session's mode.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// The shared cache store.
    pub fn store(&self) -> &Arc<CacheStore<QueryKey, Payload>> {
        &self.store
    }

    /// Subscribe to cache events, for the UI layer's re-render loop.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent<QueryKey>> {
        self.store.subscribe()
    }

    /// Register a view observing a key, cancelling any pending eviction.
    ///
    /// Views call this on mount and `release` on unmount; the scheduler's
    /// sweep evicts entries only after their last observer has been gone
    /// for the query's gc window.
    pub fn retain(&self, key: &QueryKey) {
        self.store.retain(key);
    }

    /// Release one observer of a key.
    ///
    /// When the last observer goes away the entry gets an eviction deadline
    /// of now plus the query's configured gc time.
    pub fn release(&self, key: &QueryKey) {
        let gc_time = self
            .registry
            .config(key.name())
            .map_or_else(|| chrono::Duration::minutes(5), |c| c.gc_time);
        self.store.release(key, gc_time);
    }

    /// Report application visibility; the scheduler polls only while
    /// visible.
    pub fn set_visible(&self, visible: bool) {
        self.visibility.set_visible(visible);
    }

    /// Clear the rate-limit gate once the retry window has passed.
    pub fn clear_rate_limit(&self) {
        self.rate_gate.clear();
    }

    /// Whether syncs are currently refused.
    pub fn is_rate_limited(&self) -> bool {
        self.rate_gate.is_limited()
    }

    /// User-triggered sync for one page.
    pub async fn sync_page(&self, page: Page) -> Result<(), SyncError> {
        self.coordinator.sync_page(page).await
    }

    /// User-triggered full sync.
    pub async fn full_sync(&self) -> Result<(), SyncError> {
        self.coordinator.full_sync().await
    }

    /// Start the background scheduler.
    ///
    /// Returns the shutdown sender (send `true` to stop) and the task
    /// handle.
    pub fn spawn_scheduler(self: &Arc<Self>) -> (watch::Sender<bool>, JoinHandle<()>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let session = Arc::clone(self);
        let executor: PollExecutor = Box::new(move |name| {
            let session = Arc::clone(&session);
            Box::pin(async move { session.refresh(name).await })
        });
        let scheduler = Arc::clone(&self.scheduler);
        let handle = tokio::spawn(async move { scheduler.run(shutdown_rx, executor).await });
        (shutdown_tx, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tally_registry::QueryName;

    #[test]
    fn released_entries_are_swept_after_their_gc_window() {
        let session = Session::new(SessionMode::Demo, SessionConfig::default()).unwrap();
        let dashboard = QueryKey::new(QueryName::Dashboard, SessionMode::Demo);
        let stash = QueryKey::new(QueryName::Stash, SessionMode::Demo);
        session
            .store()
            .set(dashboard.clone(), Payload::UnmappedCategories(Vec::new()));
        session
            .store()
            .set(stash.clone(), Payload::UnmappedCategories(Vec::new()));

        session.retain(&dashboard);
        session.retain(&stash);
        session.release(&dashboard);

        // Well past Dashboard's gc window; the watched entry survives.
        let swept = session.store().sweep(Utc::now() + chrono::Duration::hours(1));
        assert_eq!(swept, 1);
        assert!(!session.store().contains(&dashboard));
        assert!(session.store().contains(&stash));
    }

    #[test]
    fn remounting_an_observer_cancels_eviction() {
        let session = Session::new(SessionMode::Demo, SessionConfig::default()).unwrap();
        let key = QueryKey::new(QueryName::Goals, SessionMode::Demo);
        session
            .store()
            .set(key.clone(), Payload::UnmappedCategories(Vec::new()));

        session.retain(&key);
        session.release(&key);
        session.retain(&key);

        assert_eq!(session.store().sweep(Utc::now() + chrono::Duration::hours(1)), 0);
        assert!(session.store().contains(&key));
    }

    #[test]
    fn demo_session_builds_with_standard_tables() {
        let session = Session::new(SessionMode::Demo, SessionConfig::default()).unwrap();
        assert_eq!(session.mode(), SessionMode::Demo);
        assert!(!session.is_rate_limited());
    }

    #[test]
    fn rate_limit_gate_round_trips() {
        let session = Session::new(SessionMode::Demo, SessionConfig::default()).unwrap();
        session.rate_gate.set();
        assert!(session.is_rate_limited());
        session.clear_rate_limit();
        assert!(!session.is_rate_limited());
    }
}
