//! The data-access capability trait.
//!
//! One async method per resource. Two implementations exist: the remote
//! HTTP backend and the demo/offline backend. A session picks one at
//! startup and hands it around as `Arc<dyn DataAccess>`; the consistency
//! layer never branches on the mode again.
//!
//! Network timeouts live inside the implementations; to callers a failure
//! is just a rejected future requiring rollback.

use async_trait::async_trait;

use tally_registry::{MonthKey, SyncScope};

use crate::error::RemoteError;
use crate::types::{
    Allocation, ArchivedNote, CategoryStorePayload, Dashboard, GoalSummary, MonthNote,
    RolloverStatus, SavedView, SearchHit, StashItem, StashPatch, TransactionsPage,
};

/// Capability interface over the data provider.
#[async_trait]
pub trait DataAccess: Send + Sync {
    // Reads

    async fn fetch_dashboard(&self) -> Result<Dashboard, RemoteError>;

    async fn fetch_stash(&self) -> Result<Vec<StashItem>, RemoteError>;

    async fn fetch_goals(&self) -> Result<Vec<GoalSummary>, RemoteError>;

    async fn fetch_category_store(&self) -> Result<CategoryStorePayload, RemoteError>;

    async fn fetch_unmapped_categories(&self) -> Result<Vec<String>, RemoteError>;

    async fn fetch_month_notes(&self, month: &MonthKey) -> Result<Vec<MonthNote>, RemoteError>;

    async fn fetch_archived_notes(&self) -> Result<Vec<ArchivedNote>, RemoteError>;

    async fn fetch_saved_views(&self) -> Result<Vec<SavedView>, RemoteError>;

    async fn fetch_rollover_status(&self, month: &MonthKey)
    -> Result<RolloverStatus, RemoteError>;

    async fn fetch_transactions(
        &self,
        cursor: Option<&str>,
    ) -> Result<TransactionsPage, RemoteError>;

    async fn search(&self, term: &str) -> Result<Vec<SearchHit>, RemoteError>;

    // Writes

    async fn update_stash_item(
        &self,
        id: &str,
        patch: StashPatch,
    ) -> Result<StashItem, RemoteError>;

    async fn create_stash_item(&self, item: StashItem) -> Result<StashItem, RemoteError>;

    async fn delete_stash_item(&self, id: &str) -> Result<(), RemoteError>;

    async fn batch_allocate(&self, allocations: Vec<Allocation>) -> Result<(), RemoteError>;

    async fn rename_category(&self, id: &str, name: &str) -> Result<(), RemoteError>;

    async fn remove_linked_category(&self, id: &str) -> Result<(), RemoteError>;

    async fn set_rollover(
        &self,
        category_id: &str,
        month: &MonthKey,
        enabled: bool,
    ) -> Result<(), RemoteError>;

    async fn save_month_note(&self, month: &MonthKey, body: &str) -> Result<MonthNote, RemoteError>;

    async fn archive_note(&self, month: &MonthKey) -> Result<ArchivedNote, RemoteError>;

    async fn reorder_saved_views(&self, ordered_ids: Vec<String>) -> Result<(), RemoteError>;

    async fn update_goal(
        &self,
        id: &str,
        target_amount: i64,
        due_month: Option<MonthKey>,
    ) -> Result<GoalSummary, RemoteError>;

    // Sync

    /// Ask the provider to resynchronize, narrowed to `scope`.
    async fn trigger_scoped_sync(&self, scope: SyncScope) -> Result<(), RemoteError>;
}
