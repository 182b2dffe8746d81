//! Page-scoped "sync now".
//!
//! A user-triggered sync asks the backend to resynchronize the page's
//! scope, then invalidates the page's primary queries (refetch now) and
//! marks its supporting queries stale (refetch on next view). Supporting
//! queries of other pages are never touched.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use tracing::{info, warn};

use tally_cache::{CacheStore, RefetchPolicy};
use tally_registry::{Page, PageMap, QueryKey, QueryRegistry, SessionMode, SyncScope};
use tally_remote::{DataAccess, RemoteError};

use crate::engine::invalidate_by_name;
use crate::error::SyncError;
use crate::gates::RateLimitGate;

/// Coordinates user-triggered syncs against the backend.
///
/// At most one sync per page and at most one full sync can be in flight;
/// concurrent requests are refused with a typed error rather than queued,
/// since the first sync's settlement already covers them.
pub struct PageSyncCoordinator<V> {
    store: Arc<CacheStore<QueryKey, V>>,
    pages: Arc<PageMap>,
    registry: Arc<QueryRegistry>,
    backend: Arc<dyn DataAccess>,
    rate_gate: Arc<RateLimitGate>,
    mode: SessionMode,
    in_flight: DashSet<Page>,
    full_sync_running: AtomicBool,
}

/// Removes a page from the in-flight set when the sync finishes,
/// including on error paths.
struct InFlightGuard<'a> {
    pages: &'a DashSet<Page>,
    page: Page,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.pages.remove(&self.page);
    }
}

/// Clears the full-sync flag when the sync finishes.
struct FullSyncGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for FullSyncGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl<V> PageSyncCoordinator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<CacheStore<QueryKey, V>>,
        pages: Arc<PageMap>,
        registry: Arc<QueryRegistry>,
        backend: Arc<dyn DataAccess>,
        rate_gate: Arc<RateLimitGate>,
        mode: SessionMode,
    ) -> Self {
        Self {
            store,
            pages,
            registry,
            backend,
            rate_gate,
            mode,
            in_flight: DashSet::new(),
            full_sync_running: AtomicBool::new(false),
        }
    }

    /// Run a scoped sync for one page.
    ///
    /// Refused synchronously while the rate-limit gate is set or a sync
    /// for the same page is already in flight.
    #[tracing::instrument(skip(self))]
    pub async fn sync_page(&self, page: Page) -> Result<(), SyncError> {
        if self.rate_gate.is_limited() {
            return Err(SyncError::RateLimited);
        }
        let requirement = self
            .pages
            .requirement(page)
            .ok_or(SyncError::UnknownPage { page })?
            .clone();

        if !self.in_flight.insert(page) {
            return Err(SyncError::AlreadySyncing { page });
        }
        let _guard = InFlightGuard {
            pages: &self.in_flight,
            page,
        };

        info!(page = %page, scope = %requirement.sync_scope, "page sync started");
        self.trigger(requirement.sync_scope).await?;

        for &name in &requirement.primary {
            invalidate_by_name(&self.store, self.mode, name, RefetchPolicy::Active);
        }
        for &name in &requirement.supporting {
            invalidate_by_name(&self.store, self.mode, name, RefetchPolicy::None);
        }
        info!(page = %page, "page sync settled");
        Ok(())
    }

    /// Run a full sync, then actively invalidate every registered query.
    #[tracing::instrument(skip(self))]
    pub async fn full_sync(&self) -> Result<(), SyncError> {
        if self.rate_gate.is_limited() {
            return Err(SyncError::RateLimited);
        }
        if self
            .full_sync_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SyncError::FullSyncRunning);
        }
        let _guard = FullSyncGuard {
            running: &self.full_sync_running,
        };

        info!("full sync started");
        self.trigger(SyncScope::Full).await?;

        for name in self.registry.query_names() {
            invalidate_by_name(&self.store, self.mode, name, RefetchPolicy::Active);
        }
        info!("full sync settled");
        Ok(())
    }

    async fn trigger(&self, scope: SyncScope) -> Result<(), SyncError> {
        match self.backend.trigger_scoped_sync(scope).await {
            Ok(()) => Ok(()),
            Err(err @ RemoteError::RateLimited { .. }) => {
                warn!(scope = %scope, error = %err, "provider rate limited, gating further syncs");
                self.rate_gate.set();
                Err(err.into())
            }
            Err(err) => {
                warn!(scope = %scope, error = %err, "scoped sync failed");
                Err(err.into())
            }
        }
    }

    /// Whether a sync for the page is currently in flight.
    pub fn is_syncing(&self, page: Page) -> bool {
        self.in_flight.contains(&page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tally_cache::CacheEvent;
    use tally_registry::{MonthKey, QueryName};
    use tally_remote::types::*;

    /// Backend double that records sync scopes and fails on demand.
    #[derive(Default)]
    struct FakeBackend {
        scopes: Mutex<Vec<SyncScope>>,
        fail_with: Mutex<Option<RemoteError>>,
    }

    #[async_trait]
    impl DataAccess for FakeBackend {
        async fn fetch_dashboard(&self) -> Result<Dashboard, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn fetch_stash(&self) -> Result<Vec<StashItem>, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn fetch_goals(&self) -> Result<Vec<GoalSummary>, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn fetch_category_store(&self) -> Result<CategoryStorePayload, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn fetch_unmapped_categories(&self) -> Result<Vec<String>, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn fetch_month_notes(&self, _month: &MonthKey) -> Result<Vec<MonthNote>, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn fetch_archived_notes(&self) -> Result<Vec<ArchivedNote>, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn fetch_saved_views(&self) -> Result<Vec<SavedView>, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn fetch_rollover_status(
            &self,
            _month: &MonthKey,
        ) -> Result<RolloverStatus, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn fetch_transactions(
            &self,
            _cursor: Option<&str>,
        ) -> Result<TransactionsPage, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn search(&self, _term: &str) -> Result<Vec<SearchHit>, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn update_stash_item(
            &self,
            _id: &str,
            _patch: StashPatch,
        ) -> Result<StashItem, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn create_stash_item(&self, _item: StashItem) -> Result<StashItem, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn delete_stash_item(&self, _id: &str) -> Result<(), RemoteError> {
            unimplemented!("not exercised")
        }
        async fn batch_allocate(&self, _allocations: Vec<Allocation>) -> Result<(), RemoteError> {
            unimplemented!("not exercised")
        }
        async fn rename_category(&self, _id: &str, _name: &str) -> Result<(), RemoteError> {
            unimplemented!("not exercised")
        }
        async fn remove_linked_category(&self, _id: &str) -> Result<(), RemoteError> {
            unimplemented!("not exercised")
        }
        async fn set_rollover(
            &self,
            _category_id: &str,
            _month: &MonthKey,
            _enabled: bool,
        ) -> Result<(), RemoteError> {
            unimplemented!("not exercised")
        }
        async fn save_month_note(
            &self,
            _month: &MonthKey,
            _body: &str,
        ) -> Result<MonthNote, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn archive_note(&self, _month: &MonthKey) -> Result<ArchivedNote, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn reorder_saved_views(&self, _ordered_ids: Vec<String>) -> Result<(), RemoteError> {
            unimplemented!("not exercised")
        }
        async fn update_goal(
            &self,
            _id: &str,
            _target_amount: i64,
            _due_month: Option<MonthKey>,
        ) -> Result<GoalSummary, RemoteError> {
            unimplemented!("not exercised")
        }
        async fn trigger_scoped_sync(&self, scope: SyncScope) -> Result<(), RemoteError> {
            if let Some(err) = self.fail_with.lock().unwrap().take() {
                return Err(err);
            }
            self.scopes.lock().unwrap().push(scope);
            Ok(())
        }
    }

    fn coordinator(
        backend: Arc<FakeBackend>,
        gate: Arc<RateLimitGate>,
    ) -> PageSyncCoordinator<i64> {
        PageSyncCoordinator::new(
            CacheStore::new(),
            Arc::new(PageMap::standard()),
            Arc::new(QueryRegistry::standard()),
            backend,
            gate,
            SessionMode::Demo,
        )
    }

    #[tokio::test]
    async fn notes_sync_invalidates_primary_and_marks_supporting_stale() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(Arc::clone(&backend), Arc::new(RateLimitGate::new()));
        let mut rx = coord.store.subscribe();

        coord.sync_page(Page::Notes).await.unwrap();

        assert_eq!(
            backend.scopes.lock().unwrap().as_slice(),
            &[SyncScope::Notes]
        );

        let mut active = Vec::new();
        let mut lazy = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CacheEvent::Invalidated { key, refetch } = event {
                match refetch {
                    RefetchPolicy::Active => active.push(key.name()),
                    RefetchPolicy::None => lazy.push(key.name()),
                }
            }
        }
        assert_eq!(active, vec![QueryName::MonthNotes]);
        assert_eq!(lazy, vec![QueryName::CategoryStore, QueryName::ArchivedNotes]);
    }

    #[tokio::test]
    async fn rate_gate_refuses_before_any_remote_call() {
        let backend = Arc::new(FakeBackend::default());
        let gate = Arc::new(RateLimitGate::new());
        gate.set();
        let coord = coordinator(Arc::clone(&backend), gate);

        let err = coord.sync_page(Page::Notes).await.unwrap_err();
        assert!(matches!(err, SyncError::RateLimited));
        assert!(backend.scopes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_rate_limit_sets_the_gate() {
        let backend = Arc::new(FakeBackend::default());
        *backend.fail_with.lock().unwrap() = Some(RemoteError::RateLimited {
            retry_after_secs: Some(30),
        });
        let gate = Arc::new(RateLimitGate::new());
        let coord = coordinator(Arc::clone(&backend), Arc::clone(&gate));

        let err = coord.sync_page(Page::Stash).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert!(gate.is_limited());
        // Page released for a retry after the gate clears.
        assert!(!coord.is_syncing(Page::Stash));
    }

    #[tokio::test]
    async fn failed_sync_releases_the_page() {
        let backend = Arc::new(FakeBackend::default());
        *backend.fail_with.lock().unwrap() = Some(RemoteError::NotFound {
            resource: "sync".to_string(),
        });
        let coord = coordinator(Arc::clone(&backend), Arc::new(RateLimitGate::new()));

        assert!(coord.sync_page(Page::Budget).await.is_err());
        assert!(!coord.is_syncing(Page::Budget));
        assert!(coord.sync_page(Page::Budget).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_sync_for_same_page_is_rejected() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(Arc::clone(&backend), Arc::new(RateLimitGate::new()));
        coord.in_flight.insert(Page::Notes);

        let err = coord.sync_page(Page::Notes).await.unwrap_err();
        assert!(matches!(err, SyncError::AlreadySyncing { page: Page::Notes }));
        assert!(backend.scopes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_full_sync_is_rejected() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(Arc::clone(&backend), Arc::new(RateLimitGate::new()));
        coord.full_sync_running.store(true, Ordering::SeqCst);

        let err = coord.full_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::FullSyncRunning));
        assert!(backend.scopes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn full_sync_invalidates_every_registered_query() {
        let backend = Arc::new(FakeBackend::default());
        let coord = coordinator(Arc::clone(&backend), Arc::new(RateLimitGate::new()));
        let mut rx = coord.store.subscribe();

        coord.full_sync().await.unwrap();

        assert_eq!(
            backend.scopes.lock().unwrap().as_slice(),
            &[SyncScope::Full]
        );
        let mut invalidated = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let CacheEvent::Invalidated { key, refetch } = event {
                assert_eq!(refetch, RefetchPolicy::Active);
                invalidated.push(key.name());
            }
        }
        assert_eq!(invalidated.len(), QueryRegistry::standard().query_names().len());
    }
}
