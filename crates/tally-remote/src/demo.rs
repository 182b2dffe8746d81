//! Demo/offline backend.
//!
//! Structurally identical to the remote backend but backed by local state:
//! reads snapshot the in-memory tables, writes mutate them, and the whole
//! state can be persisted to a JSON file so a demo session survives
//! restarts. Selected once per session by the demo mode flag.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use tally_registry::{MonthKey, SyncScope};

use crate::access::DataAccess;
use crate::error::RemoteError;
use crate::types::{
    Allocation, ArchivedNote, Category, CategoryGroup, CategoryStorePayload, Dashboard,
    GoalSummary, MonthNote, RolloverEntry, RolloverStatus, SavedView, SearchHit, StashItem,
    StashStatus, Transaction, TransactionsPage,
};

/// Everything the demo backend knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemoState {
    pub dashboard: Dashboard,
    pub stash: Vec<StashItem>,
    pub goals: Vec<GoalSummary>,
    pub groups: Vec<CategoryGroup>,
    pub categories: Vec<Category>,
    pub notes: Vec<MonthNote>,
    pub archived_notes: Vec<ArchivedNote>,
    pub saved_views: Vec<SavedView>,
    pub rollover: Vec<(MonthKey, Vec<RolloverEntry>)>,
    pub transactions: Vec<Transaction>,
}

impl DemoState {
    /// A small, plausible seed budget.
    pub fn seeded() -> Self {
        let month = MonthKey::new(2026, 8);
        let mut vacation = StashItem {
            id: "stash-vacation".to_string(),
            name: "Vacation".to_string(),
            planned_budget: 100_000,
            balance: 250_000,
            target_amount: Some(1_000_000),
            progress_percent: 0,
            status: StashStatus::Empty,
        };
        vacation.recompute_progress();

        let mut emergency = StashItem {
            id: "stash-emergency".to_string(),
            name: "Emergency fund".to_string(),
            planned_budget: 0,
            balance: 3_000_000,
            target_amount: Some(3_000_000),
            progress_percent: 0,
            status: StashStatus::Empty,
        };
        emergency.recompute_progress();

        Self {
            dashboard: Dashboard {
                month: month.clone(),
                to_be_budgeted: 425_000,
                activity: -180_000,
                age_of_money: Some(23),
            },
            stash: vec![vacation, emergency],
            goals: vec![GoalSummary {
                id: "goal-vacation".to_string(),
                stash_id: "stash-vacation".to_string(),
                name: "Vacation".to_string(),
                target_amount: 1_000_000,
                funded_amount: 250_000,
                due_month: Some(MonthKey::new(2027, 6)),
            }],
            groups: vec![
                CategoryGroup {
                    id: "grp-fixed".to_string(),
                    name: "Fixed costs".to_string(),
                    group_order: 0,
                },
                CategoryGroup {
                    id: "grp-fun".to_string(),
                    name: "Quality of life".to_string(),
                    group_order: 1,
                },
            ],
            categories: vec![
                Category {
                    id: "cat-rent".to_string(),
                    group_id: "grp-fixed".to_string(),
                    name: "Rent".to_string(),
                    linked_account_id: Some("acct-checking".to_string()),
                    item_order: 0,
                },
                Category {
                    id: "cat-dining".to_string(),
                    group_id: "grp-fun".to_string(),
                    name: "Dining out".to_string(),
                    linked_account_id: None,
                    item_order: 0,
                },
            ],
            notes: vec![MonthNote {
                month: month.clone(),
                body: "Moved the vacation target up a month.".to_string(),
                updated_at: Utc::now(),
            }],
            archived_notes: Vec::new(),
            saved_views: vec![
                SavedView {
                    id: "view-spending".to_string(),
                    name: "Spending by category".to_string(),
                    sort_order: 0,
                },
                SavedView {
                    id: "view-net".to_string(),
                    name: "Net worth".to_string(),
                    sort_order: 1,
                },
            ],
            rollover: vec![(
                month,
                vec![RolloverEntry {
                    category_id: "cat-dining".to_string(),
                    enabled: true,
                }],
            )],
            transactions: Vec::new(),
        }
    }
}

/// Offline data-access backend over a seeded local state.
pub struct DemoBackend {
    state: RwLock<DemoState>,
    /// JSON file the state is persisted to after each write, if set.
    storage_path: Option<PathBuf>,
}

impl DemoBackend {
    /// Create a backend with the standard seed.
    pub fn new() -> Self {
        Self::with_state(DemoState::seeded())
    }

    /// Create a backend around an explicit state (tests use this).
    pub fn with_state(state: DemoState) -> Self {
        Self {
            state: RwLock::new(state),
            storage_path: None,
        }
    }

    /// Create a backend persisted at `path`, loading existing state if the
    /// file is present and readable.
    pub fn with_storage(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!(error = %e, "demo state file unreadable, reseeding");
                    DemoState::seeded()
                }
            },
            Err(_) => DemoState::seeded(),
        };
        Self {
            state: RwLock::new(state),
            storage_path: Some(path),
        }
    }

    /// Write the current state to the storage file, if configured.
    async fn persist(&self) {
        let Some(path) = &self.storage_path else {
            return;
        };
        let state = self.state.read().await;
        match serde_json::to_vec_pretty(&*state) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    warn!(error = %e, "failed to persist demo state");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize demo state"),
        }
    }
}

impl Default for DemoBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataAccess for DemoBackend {
    async fn fetch_dashboard(&self) -> Result<Dashboard, RemoteError> {
        Ok(self.state.read().await.dashboard.clone())
    }

    async fn fetch_stash(&self) -> Result<Vec<StashItem>, RemoteError> {
        Ok(self.state.read().await.stash.clone())
    }

    async fn fetch_goals(&self) -> Result<Vec<GoalSummary>, RemoteError> {
        Ok(self.state.read().await.goals.clone())
    }

    async fn fetch_category_store(&self) -> Result<CategoryStorePayload, RemoteError> {
        let state = self.state.read().await;
        Ok(CategoryStorePayload {
            groups: state.groups.clone(),
            categories: state.categories.clone(),
        })
    }

    async fn fetch_unmapped_categories(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self
            .state
            .read()
            .await
            .categories
            .iter()
            .filter(|c| c.linked_account_id.is_none())
            .map(|c| c.id.clone())
            .collect())
    }

    async fn fetch_month_notes(&self, month: &MonthKey) -> Result<Vec<MonthNote>, RemoteError> {
        Ok(self
            .state
            .read()
            .await
            .notes
            .iter()
            .filter(|n| &n.month == month)
            .cloned()
            .collect())
    }

    async fn fetch_archived_notes(&self) -> Result<Vec<ArchivedNote>, RemoteError> {
        Ok(self.state.read().await.archived_notes.clone())
    }

    async fn fetch_saved_views(&self) -> Result<Vec<SavedView>, RemoteError> {
        Ok(self.state.read().await.saved_views.clone())
    }

    async fn fetch_rollover_status(
        &self,
        month: &MonthKey,
    ) -> Result<RolloverStatus, RemoteError> {
        let state = self.state.read().await;
        let entries = state
            .rollover
            .iter()
            .find(|(m, _)| m == month)
            .map(|(_, entries)| entries.clone())
            .unwrap_or_default();
        Ok(RolloverStatus {
            month: month.clone(),
            entries,
        })
    }

    async fn fetch_transactions(
        &self,
        _cursor: Option<&str>,
    ) -> Result<TransactionsPage, RemoteError> {
        // Demo data is small enough for a single page.
        Ok(TransactionsPage {
            items: self.state.read().await.transactions.clone(),
            next_cursor: None,
        })
    }

    async fn search(&self, term: &str) -> Result<Vec<SearchHit>, RemoteError> {
        let needle = term.trim().to_lowercase();
        let state = self.state.read().await;
        Ok(state
            .stash
            .iter()
            .filter(|s| s.name.to_lowercase().contains(&needle))
            .map(|s| SearchHit {
                id: s.id.clone(),
                kind: "stash".to_string(),
                label: s.name.clone(),
            })
            .chain(
                state
                    .categories
                    .iter()
                    .filter(|c| c.name.to_lowercase().contains(&needle))
                    .map(|c| SearchHit {
                        id: c.id.clone(),
                        kind: "category".to_string(),
                        label: c.name.clone(),
                    }),
            )
            .collect())
    }

    async fn update_stash_item(
        &self,
        id: &str,
        patch: crate::types::StashPatch,
    ) -> Result<StashItem, RemoteError> {
        let updated = {
            let mut state = self.state.write().await;
            let item = state
                .stash
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| RemoteError::NotFound {
                    resource: format!("stash/{id}"),
                })?;

            if let Some(name) = patch.name {
                item.name = name;
            }
            if let Some(planned) = patch.planned_budget {
                item.planned_budget = planned;
            }
            if let Some(target) = patch.target_amount {
                item.target_amount = Some(target);
            }
            item.recompute_progress();
            item.clone()
        };
        self.persist().await;
        Ok(updated)
    }

    async fn create_stash_item(&self, mut item: StashItem) -> Result<StashItem, RemoteError> {
        item.recompute_progress();
        {
            let mut state = self.state.write().await;
            state.stash.push(item.clone());
        }
        self.persist().await;
        Ok(item)
    }

    async fn delete_stash_item(&self, id: &str) -> Result<(), RemoteError> {
        {
            let mut state = self.state.write().await;
            let before = state.stash.len();
            state.stash.retain(|s| s.id != id);
            if state.stash.len() == before {
                return Err(RemoteError::NotFound {
                    resource: format!("stash/{id}"),
                });
            }
            state.goals.retain(|g| g.stash_id != id);
        }
        self.persist().await;
        Ok(())
    }

    async fn batch_allocate(&self, allocations: Vec<Allocation>) -> Result<(), RemoteError> {
        {
            let mut state = self.state.write().await;
            for allocation in &allocations {
                if let Some(item) = state.stash.iter_mut().find(|s| s.id == allocation.stash_id)
                {
                    item.planned_budget = allocation.amount;
                    item.recompute_progress();
                }
            }
        }
        self.persist().await;
        Ok(())
    }

    async fn rename_category(&self, id: &str, name: &str) -> Result<(), RemoteError> {
        {
            let mut state = self.state.write().await;
            let category = state
                .categories
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| RemoteError::NotFound {
                    resource: format!("categories/{id}"),
                })?;
            category.name = name.to_string();
        }
        self.persist().await;
        Ok(())
    }

    async fn remove_linked_category(&self, id: &str) -> Result<(), RemoteError> {
        {
            let mut state = self.state.write().await;
            let category = state
                .categories
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or_else(|| RemoteError::NotFound {
                    resource: format!("categories/{id}"),
                })?;
            category.linked_account_id = None;
        }
        self.persist().await;
        Ok(())
    }

    async fn set_rollover(
        &self,
        category_id: &str,
        month: &MonthKey,
        enabled: bool,
    ) -> Result<(), RemoteError> {
        {
            let mut state = self.state.write().await;
            if !state.rollover.iter().any(|(m, _)| m == month) {
                state.rollover.push((month.clone(), Vec::new()));
            }
            let entries = state
                .rollover
                .iter_mut()
                .find(|(m, _)| m == month)
                .map(|(_, entries)| entries)
                .expect("rollover month just ensured");
            match entries.iter_mut().find(|e| e.category_id == category_id) {
                Some(entry) => entry.enabled = enabled,
                None => entries.push(RolloverEntry {
                    category_id: category_id.to_string(),
                    enabled,
                }),
            }
        }
        self.persist().await;
        Ok(())
    }

    async fn save_month_note(
        &self,
        month: &MonthKey,
        body: &str,
    ) -> Result<MonthNote, RemoteError> {
        let note = MonthNote {
            month: month.clone(),
            body: body.to_string(),
            updated_at: Utc::now(),
        };
        {
            let mut state = self.state.write().await;
            state.notes.retain(|n| &n.month != month);
            state.notes.push(note.clone());
        }
        self.persist().await;
        Ok(note)
    }

    async fn archive_note(&self, month: &MonthKey) -> Result<ArchivedNote, RemoteError> {
        let archived = {
            let mut state = self.state.write().await;
            let position = state
                .notes
                .iter()
                .position(|n| &n.month == month)
                .ok_or_else(|| RemoteError::NotFound {
                    resource: format!("notes/{month}"),
                })?;
            let note = state.notes.remove(position);
            let archived = ArchivedNote {
                id: format!("archived-{month}"),
                month: note.month,
                body: note.body,
                archived_at: Utc::now(),
            };
            state.archived_notes.push(archived.clone());
            archived
        };
        self.persist().await;
        Ok(archived)
    }

    async fn reorder_saved_views(&self, ordered_ids: Vec<String>) -> Result<(), RemoteError> {
        {
            let mut state = self.state.write().await;
            for (position, id) in ordered_ids.iter().enumerate() {
                if let Some(view) = state.saved_views.iter_mut().find(|v| &v.id == id) {
                    view.sort_order = position as i32;
                }
            }
            state.saved_views.sort_by_key(|v| v.sort_order);
        }
        self.persist().await;
        Ok(())
    }

    async fn update_goal(
        &self,
        id: &str,
        target_amount: i64,
        due_month: Option<MonthKey>,
    ) -> Result<GoalSummary, RemoteError> {
        let updated = {
            let mut state = self.state.write().await;
            let goal = state
                .goals
                .iter_mut()
                .find(|g| g.id == id)
                .ok_or_else(|| RemoteError::NotFound {
                    resource: format!("goals/{id}"),
                })?;
            goal.target_amount = target_amount;
            if due_month.is_some() {
                goal.due_month = due_month;
            }
            goal.clone()
        };
        self.persist().await;
        Ok(updated)
    }

    async fn trigger_scoped_sync(&self, scope: SyncScope) -> Result<(), RemoteError> {
        // Local state has no backend to resynchronize with.
        debug!(%scope, "demo scoped sync is a no-op");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StashPatch;

    #[tokio::test]
    async fn update_recomputes_derived_fields() {
        let backend = DemoBackend::new();
        let item = backend
            .update_stash_item(
                "stash-vacation",
                StashPatch {
                    planned_budget: Some(0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(item.planned_budget, 0);
        assert_eq!(item.status, StashStatus::Underfunded);
    }

    #[tokio::test]
    async fn unknown_stash_item_is_not_found() {
        let backend = DemoBackend::new();
        let err = backend
            .update_stash_item("stash-nope", StashPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::NotFound { .. }));
    }

    #[tokio::test]
    async fn batch_allocate_applies_all_amounts() {
        let backend = DemoBackend::new();
        backend
            .batch_allocate(vec![
                Allocation {
                    stash_id: "stash-vacation".to_string(),
                    amount: 200_000,
                },
                Allocation {
                    stash_id: "stash-emergency".to_string(),
                    amount: 50_000,
                },
            ])
            .await
            .unwrap();

        let stash = backend.fetch_stash().await.unwrap();
        assert_eq!(
            stash.iter().find(|s| s.id == "stash-vacation").unwrap().planned_budget,
            200_000
        );
        assert_eq!(
            stash.iter().find(|s| s.id == "stash-emergency").unwrap().planned_budget,
            50_000
        );
    }

    #[tokio::test]
    async fn archive_moves_note_out_of_month() {
        let backend = DemoBackend::new();
        let month = MonthKey::new(2026, 8);

        backend.archive_note(&month).await.unwrap();

        assert!(backend.fetch_month_notes(&month).await.unwrap().is_empty());
        assert_eq!(backend.fetch_archived_notes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn state_round_trips_through_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.json");

        {
            let backend = DemoBackend::with_storage(&path);
            backend
                .save_month_note(&MonthKey::new(2026, 9), "persisted")
                .await
                .unwrap();
        }

        let backend = DemoBackend::with_storage(&path);
        let notes = backend
            .fetch_month_notes(&MonthKey::new(2026, 9))
            .await
            .unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].body, "persisted");
    }
}
