//! Typed read entry points.
//!
//! Each query serves a fresh cache hit directly; stale or missing entries
//! refetch through the generation protocol, so a completing fetch that was
//! superseded by a newer write is discarded rather than applied. Fetch
//! failures surface the cached (stale) value alongside the error instead
//! of dropping it.

use std::future::Future;
use std::sync::Arc;

use chrono::Duration;

use tally_cache::Normalized;
use tally_registry::{MonthKey, QueryKey, QueryName};
use tally_remote::{
    ArchivedNote, Dashboard, GoalSummary, MonthNote, RemoteError, RolloverStatus, SavedView,
    SearchHit, StashItem, TransactionsPage,
};
use tally_sync::SyncError;

use crate::payload::{AvailableFunds, CategoryStore, Payload};
use crate::session::Session;

/// Snapshot of one query as the UI sees it.
#[derive(Debug)]
pub struct QueryState<T> {
    /// Current value, possibly stale while a refetch is out.
    pub data: Option<T>,
    /// Whether a fetch for this key is in flight.
    pub is_loading: bool,
    /// The most recent fetch failure, if the returned data is not fresh.
    pub error: Option<SyncError>,
}

impl Session {
    fn stale_time(&self, name: QueryName) -> Duration {
        self.registry
            .config(name)
            .map_or_else(|| Duration::minutes(1), |c| c.stale_time)
    }

    /// Current state without fetching.
    pub(crate) fn state_of<T>(
        &self,
        key: &QueryKey,
        extract: impl Fn(&Payload) -> Option<T>,
    ) -> QueryState<T> {
        QueryState {
            data: self.store.get(key).as_ref().and_then(extract),
            is_loading: self.in_flight.contains_key(key),
            error: None,
        }
    }

    pub(crate) fn begin_loading(&self, key: &QueryKey) {
        *self.in_flight.entry(key.clone()).or_insert(0) += 1;
    }

    pub(crate) fn finish_loading(&self, key: &QueryKey) {
        // Drop the guard before removing to avoid deadlocking the shard.
        let drained = self
            .in_flight
            .get_mut(key)
            .map(|mut count| {
                *count = count.saturating_sub(1);
                *count == 0
            })
            .unwrap_or(false);
        if drained {
            self.in_flight.remove_if(key, |_, count| *count == 0);
        }
    }

    /// Serve fresh, else fetch through the generation protocol.
    async fn load<T>(
        &self,
        key: QueryKey,
        fetch: impl Future<Output = Result<Payload, RemoteError>>,
        extract: impl Fn(&Payload) -> Option<T>,
    ) -> QueryState<T> {
        if self.store.is_fresh(&key, self.stale_time(key.name())) {
            return self.state_of(&key, extract);
        }

        self.begin_loading(&key);
        let ticket = self.store.begin_fetch(&key);
        let result = fetch.await;
        self.finish_loading(&key);

        match result {
            Ok(payload) => {
                // Discarded when a newer write superseded the ticket.
                self.store.complete_fetch(&ticket, payload);
                self.state_of(&key, extract)
            }
            Err(err) => {
                if err.is_rate_limited() {
                    self.rate_gate.set();
                }
                let mut state = self.state_of(&key, extract);
                state.error = Some(err.into());
                state
            }
        }
    }

    pub async fn dashboard(&self) -> QueryState<Dashboard> {
        let key = QueryKey::new(QueryName::Dashboard, self.mode);
        let backend = Arc::clone(&self.backend);
        self.load(
            key,
            async move { backend.fetch_dashboard().await.map(Payload::Dashboard) },
            |p| p.as_dashboard().cloned(),
        )
        .await
    }

    pub async fn stash(&self) -> QueryState<Normalized<StashItem>> {
        let key = QueryKey::new(QueryName::Stash, self.mode);
        let backend = Arc::clone(&self.backend);
        self.load(
            key,
            async move {
                backend
                    .fetch_stash()
                    .await
                    .map(|items| Payload::Stash(Normalized::from_list(items)))
            },
            |p| p.as_stash().cloned(),
        )
        .await
    }

    pub async fn goals(&self) -> QueryState<Vec<GoalSummary>> {
        let key = QueryKey::new(QueryName::Goals, self.mode);
        let backend = Arc::clone(&self.backend);
        self.load(
            key,
            async move { backend.fetch_goals().await.map(Payload::Goals) },
            |p| p.as_goals().map(<[GoalSummary]>::to_vec),
        )
        .await
    }

    /// Derived query: recomputed from its dependencies rather than fetched.
    ///
    /// Any dependency error is surfaced with whatever derivation was cached
    /// last.
    pub async fn available_funds(&self) -> QueryState<AvailableFunds> {
        let key = QueryKey::new(QueryName::AvailableFunds, self.mode);
        if self.store.is_fresh(&key, self.stale_time(QueryName::AvailableFunds)) {
            return self.state_of(&key, |p| p.as_available_funds().cloned());
        }

        let dashboard = self.dashboard().await;
        let stash = self.stash().await;
        let goals = self.goals().await;

        if let Some(error) = dashboard.error.or(stash.error).or(goals.error) {
            let mut state = self.state_of(&key, |p| p.as_available_funds().cloned());
            state.error = Some(error);
            return state;
        }

        match (dashboard.data, stash.data, goals.data) {
            (Some(dashboard), Some(stash), Some(goals)) => {
                let derived = AvailableFunds::derive(&dashboard, &stash, &goals);
                self.store
                    .set(key, Payload::AvailableFunds(derived.clone()));
                QueryState {
                    data: Some(derived),
                    is_loading: false,
                    error: None,
                }
            }
            _ => self.state_of(&key, |p| p.as_available_funds().cloned()),
        }
    }

    pub async fn category_store(&self) -> QueryState<CategoryStore> {
        let key = QueryKey::new(QueryName::CategoryStore, self.mode);
        let backend = Arc::clone(&self.backend);
        self.load(
            key,
            async move {
                backend
                    .fetch_category_store()
                    .await
                    .map(|payload| Payload::CategoryStore(CategoryStore::from_payload(payload)))
            },
            |p| p.as_category_store().cloned(),
        )
        .await
    }

    pub async fn unmapped_categories(&self) -> QueryState<Vec<String>> {
        let key = QueryKey::new(QueryName::UnmappedCategories, self.mode);
        let backend = Arc::clone(&self.backend);
        self.load(
            key,
            async move {
                backend
                    .fetch_unmapped_categories()
                    .await
                    .map(Payload::UnmappedCategories)
            },
            |p| match p {
                Payload::UnmappedCategories(ids) => Some(ids.clone()),
                _ => None,
            },
        )
        .await
    }

    pub async fn month_notes(&self, month: MonthKey) -> QueryState<Vec<MonthNote>> {
        let key = QueryKey::for_month(QueryName::MonthNotes, self.mode, month.clone());
        let backend = Arc::clone(&self.backend);
        self.load(
            key,
            async move {
                backend
                    .fetch_month_notes(&month)
                    .await
                    .map(Payload::MonthNotes)
            },
            |p| p.as_month_notes().map(<[MonthNote]>::to_vec),
        )
        .await
    }

    pub async fn archived_notes(&self) -> QueryState<Vec<ArchivedNote>> {
        let key = QueryKey::new(QueryName::ArchivedNotes, self.mode);
        let backend = Arc::clone(&self.backend);
        self.load(
            key,
            async move {
                backend
                    .fetch_archived_notes()
                    .await
                    .map(Payload::ArchivedNotes)
            },
            |p| match p {
                Payload::ArchivedNotes(notes) => Some(notes.clone()),
                _ => None,
            },
        )
        .await
    }

    pub async fn saved_views(&self) -> QueryState<Normalized<SavedView>> {
        let key = QueryKey::new(QueryName::SavedViews, self.mode);
        let backend = Arc::clone(&self.backend);
        self.load(
            key,
            async move {
                backend.fetch_saved_views().await.map(|views| {
                    Payload::SavedViews(Normalized::from_list_sorted_by(views, |v| v.sort_order))
                })
            },
            |p| p.as_saved_views().cloned(),
        )
        .await
    }

    pub async fn rollover_status(&self, month: MonthKey) -> QueryState<RolloverStatus> {
        let key = QueryKey::for_month(QueryName::RolloverStatus, self.mode, month.clone());
        let backend = Arc::clone(&self.backend);
        self.load(
            key,
            async move {
                backend
                    .fetch_rollover_status(&month)
                    .await
                    .map(Payload::RolloverStatus)
            },
            |p| p.as_rollover_status().cloned(),
        )
        .await
    }

    pub async fn search(&self, term: &str) -> QueryState<Vec<SearchHit>> {
        let key = QueryKey::for_search(QueryName::SearchResults, self.mode, term);
        let backend = Arc::clone(&self.backend);
        let term = term.to_string();
        self.load(
            key,
            async move { backend.search(&term).await.map(Payload::SearchResults) },
            |p| match p {
                Payload::SearchResults(hits) => Some(hits.clone()),
                _ => None,
            },
        )
        .await
    }

    pub async fn transactions(&self, cursor: Option<&str>) -> QueryState<TransactionsPage> {
        let key = match cursor {
            Some(cursor) => QueryKey::for_cursor(QueryName::TransactionsPage, self.mode, cursor),
            None => QueryKey::new(QueryName::TransactionsPage, self.mode),
        };
        let backend = Arc::clone(&self.backend);
        let cursor = cursor.map(str::to_string);
        self.load(
            key,
            async move {
                backend
                    .fetch_transactions(cursor.as_deref())
                    .await
                    .map(Payload::Transactions)
            },
            |p| match p {
                Payload::Transactions(page) => Some(page.clone()),
                _ => None,
            },
        )
        .await
    }

    /// Unconditional refetch of one pollable query, for the scheduler.
    ///
    /// A name with no background fetch arm is an error, so a query newly
    /// flagged pollable surfaces as a logged failure in the next pass
    /// instead of being silently counted as refreshed. No entry is created
    /// for the rejected name.
    pub(crate) async fn refresh(&self, name: QueryName) -> Result<(), SyncError> {
        if !matches!(
            name,
            QueryName::Dashboard
                | QueryName::Stash
                | QueryName::Goals
                | QueryName::CategoryStore
                | QueryName::TransactionsPage
        ) {
            return Err(SyncError::NotPollable { query: name });
        }

        let key = QueryKey::new(name, self.mode);
        let ticket = self.store.begin_fetch(&key);
        let payload = match name {
            QueryName::Dashboard => Payload::Dashboard(self.backend.fetch_dashboard().await?),
            QueryName::Stash => {
                Payload::Stash(Normalized::from_list(self.backend.fetch_stash().await?))
            }
            QueryName::Goals => Payload::Goals(self.backend.fetch_goals().await?),
            QueryName::CategoryStore => Payload::CategoryStore(CategoryStore::from_payload(
                self.backend.fetch_category_store().await?,
            )),
            _ => Payload::Transactions(self.backend.fetch_transactions(None).await?),
        };
        self.store.complete_fetch(&ticket, payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use tally_registry::SessionMode;

    fn demo() -> Session {
        Session::new(SessionMode::Demo, SessionConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn refresh_rejects_queries_without_a_background_fetch() {
        let session = demo();

        let err = session.refresh(QueryName::SavedViews).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::NotPollable {
                query: QueryName::SavedViews
            }
        ));
        // The rejected name must not leave an empty entry behind.
        assert!(
            !session
                .store()
                .contains(&QueryKey::new(QueryName::SavedViews, SessionMode::Demo))
        );
    }

    #[tokio::test]
    async fn refresh_fetches_a_pollable_query() {
        let session = demo();
        session.refresh(QueryName::Dashboard).await.unwrap();
        assert!(
            session
                .store()
                .contains(&QueryKey::new(QueryName::Dashboard, SessionMode::Demo))
        );
    }

    #[test]
    fn loading_flag_tracks_overlapping_fetches() {
        let session = demo();
        let key = QueryKey::new(QueryName::Stash, SessionMode::Demo);
        let state = |s: &Session| s.state_of(&key, |p| p.as_stash().cloned());

        session.begin_loading(&key);
        session.begin_loading(&key);

        // The first completion must not hide the second outstanding fetch.
        session.finish_loading(&key);
        assert!(state(&session).is_loading);

        session.finish_loading(&key);
        assert!(!state(&session).is_loading);
    }
}
