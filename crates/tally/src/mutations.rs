//! Typed write entry points.
//!
//! Every mutation follows the same protocol: cancel in-flight fetches for
//! the touched keys, snapshot them, project the optimistic value, await
//! the backend, roll back verbatim on rejection, and propagate the effect
//! table's invalidations on settlement. The projection applies the same
//! derivation rules the backend does so a later refetch agrees with it.

use chrono::Utc;

use tally_cache::Normalized;
use tally_registry::{MonthKey, MutationKind, QueryKey, QueryName};
use tally_remote::{
    Allocation, ArchivedNote, GoalSummary, MonthNote, RemoteError, RolloverEntry, RolloverStatus,
    StashItem, StashPatch,
};
use tally_sync::{CacheTransaction, SyncError};

use crate::payload::Payload;
use crate::session::Session;

impl Session {
    fn key(&self, name: QueryName) -> QueryKey {
        QueryKey::new(name, self.mode)
    }

    /// Roll back a rejected mutation and map the backend error.
    fn fail(&self, tx: CacheTransaction<Payload>, err: RemoteError) -> SyncError {
        tx.rollback(&self.store);
        if err.is_rate_limited() {
            self.rate_gate.set();
        }
        err.into()
    }

    /// Write the confirmed stash item over the optimistic one.
    fn confirm_stash_item(&self, key: QueryKey, item: StashItem) {
        self.store.set_with(key, move |current| {
            let mut stash = match current {
                Some(Payload::Stash(stash)) => stash,
                _ => Normalized::default(),
            };
            stash.insert(item);
            Payload::Stash(stash)
        });
    }

    /// Set one stash item's planned budget for this month.
    #[tracing::instrument(skip(self))]
    pub async fn allocate_funds(
        &self,
        stash_id: &str,
        amount: i64,
    ) -> Result<StashItem, SyncError> {
        let stash_key = self.key(QueryName::Stash);
        let tx = CacheTransaction::begin(&self.store, std::slice::from_ref(&stash_key));
        let id = stash_id.to_string();
        tx.stage(&self.store, &stash_key, |current| {
            let mut stash = match current {
                Some(Payload::Stash(stash)) => stash,
                _ => Normalized::default(),
            };
            stash.update(&id, |item| {
                item.planned_budget = amount;
                item.recompute_progress();
            });
            Payload::Stash(stash)
        });

        let patch = StashPatch {
            planned_budget: Some(amount),
            ..Default::default()
        };
        match self.backend.update_stash_item(stash_id, patch).await {
            Ok(item) => {
                tx.commit();
                self.confirm_stash_item(stash_key, item.clone());
                self.effects.settle(MutationKind::AllocateFunds);
                Ok(item)
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Allocate across many stash items in one call.
    ///
    /// Settlement is suppressed for this mutation: the backend is
    /// eventually consistent after batch writes, so the optimistic values
    /// stand until the ambient stale time pulls fresh data.
    #[tracing::instrument(skip(self, allocations), fields(allocations = allocations.len()))]
    pub async fn batch_allocate(&self, allocations: Vec<Allocation>) -> Result<(), SyncError> {
        let stash_key = self.key(QueryName::Stash);
        let tx = CacheTransaction::begin(&self.store, std::slice::from_ref(&stash_key));
        let projected = allocations.clone();
        tx.stage(&self.store, &stash_key, |current| {
            let mut stash = match current {
                Some(Payload::Stash(stash)) => stash,
                _ => Normalized::default(),
            };
            for allocation in &projected {
                stash.update(&allocation.stash_id, |item| {
                    item.planned_budget = allocation.amount;
                    item.recompute_progress();
                });
            }
            Payload::Stash(stash)
        });

        match self.backend.batch_allocate(allocations).await {
            Ok(()) => {
                tx.commit();
                self.effects.settle(MutationKind::BatchAllocate);
                Ok(())
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Create a stash item.
    #[tracing::instrument(skip(self))]
    pub async fn create_stash_item(
        &self,
        name: &str,
        target_amount: Option<i64>,
    ) -> Result<StashItem, SyncError> {
        let mut draft = StashItem {
            // Client-assigned id, replaced by the confirmed item.
            id: format!("local-{}", Utc::now().timestamp_millis()),
            name: name.to_string(),
            planned_budget: 0,
            balance: 0,
            target_amount,
            progress_percent: 0,
            status: tally_remote::StashStatus::Empty,
        };
        draft.recompute_progress();

        let stash_key = self.key(QueryName::Stash);
        let tx = CacheTransaction::begin(&self.store, std::slice::from_ref(&stash_key));
        let optimistic = draft.clone();
        tx.stage(&self.store, &stash_key, |current| {
            let mut stash = match current {
                Some(Payload::Stash(stash)) => stash,
                _ => Normalized::default(),
            };
            stash.insert(optimistic);
            Payload::Stash(stash)
        });

        let draft_id = draft.id.clone();
        match self.backend.create_stash_item(draft).await {
            Ok(item) => {
                tx.commit();
                let confirmed = item.clone();
                self.store.set_with(stash_key, move |current| {
                    let mut stash = match current {
                        Some(Payload::Stash(stash)) => stash,
                        _ => Normalized::default(),
                    };
                    stash.remove(&draft_id);
                    stash.insert(confirmed);
                    Payload::Stash(stash)
                });
                self.effects.settle(MutationKind::CreateStashItem);
                Ok(item)
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Delete a stash item and its goal rows.
    #[tracing::instrument(skip(self))]
    pub async fn delete_stash_item(&self, stash_id: &str) -> Result<(), SyncError> {
        let stash_key = self.key(QueryName::Stash);
        let goals_key = self.key(QueryName::Goals);
        let tx =
            CacheTransaction::begin(&self.store, &[stash_key.clone(), goals_key.clone()]);

        let id = stash_id.to_string();
        tx.stage(&self.store, &stash_key, |current| {
            let mut stash = match current {
                Some(Payload::Stash(stash)) => stash,
                _ => Normalized::default(),
            };
            stash.remove(&id);
            Payload::Stash(stash)
        });
        let id = stash_id.to_string();
        tx.stage(&self.store, &goals_key, |current| {
            let mut goals = match current {
                Some(Payload::Goals(goals)) => goals,
                _ => Vec::new(),
            };
            goals.retain(|g| g.stash_id != id);
            Payload::Goals(goals)
        });

        match self.backend.delete_stash_item(stash_id).await {
            Ok(()) => {
                tx.commit();
                self.effects.settle(MutationKind::DeleteStashItem);
                Ok(())
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Rename a category.
    #[tracing::instrument(skip(self))]
    pub async fn rename_category(&self, category_id: &str, name: &str) -> Result<(), SyncError> {
        let key = self.key(QueryName::CategoryStore);
        let tx = CacheTransaction::begin(&self.store, std::slice::from_ref(&key));
        let id = category_id.to_string();
        let new_name = name.to_string();
        tx.stage(&self.store, &key, |current| match current {
            Some(Payload::CategoryStore(mut store)) => {
                store.categories.update(&id, |c| c.name = new_name);
                Payload::CategoryStore(store)
            }
            Some(other) => other,
            None => Payload::CategoryStore(crate::payload::CategoryStore {
                groups: Normalized::default(),
                categories: Normalized::default(),
            }),
        });

        match self.backend.rename_category(category_id, name).await {
            Ok(()) => {
                tx.commit();
                self.effects.settle(MutationKind::RenameCategory);
                Ok(())
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Remove the link between a category and its account.
    #[tracing::instrument(skip(self))]
    pub async fn remove_linked_category(&self, category_id: &str) -> Result<(), SyncError> {
        let key = self.key(QueryName::CategoryStore);
        let tx = CacheTransaction::begin(&self.store, std::slice::from_ref(&key));
        let id = category_id.to_string();
        tx.stage(&self.store, &key, |current| match current {
            Some(Payload::CategoryStore(mut store)) => {
                store.categories.update(&id, |c| c.linked_account_id = None);
                Payload::CategoryStore(store)
            }
            Some(other) => other,
            None => Payload::CategoryStore(crate::payload::CategoryStore {
                groups: Normalized::default(),
                categories: Normalized::default(),
            }),
        });

        match self.backend.remove_linked_category(category_id).await {
            Ok(()) => {
                tx.commit();
                self.effects.settle(MutationKind::RemoveLinkedCategory);
                Ok(())
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Toggle a category's rollover for one month.
    #[tracing::instrument(skip(self))]
    pub async fn set_rollover(
        &self,
        category_id: &str,
        month: MonthKey,
        enabled: bool,
    ) -> Result<(), SyncError> {
        let key = QueryKey::for_month(QueryName::RolloverStatus, self.mode, month.clone());
        let tx = CacheTransaction::begin(&self.store, std::slice::from_ref(&key));
        let id = category_id.to_string();
        let projected_month = month.clone();
        tx.stage(&self.store, &key, |current| {
            let mut status = match current {
                Some(Payload::RolloverStatus(status)) => status,
                _ => RolloverStatus {
                    month: projected_month,
                    entries: Vec::new(),
                },
            };
            match status.entries.iter_mut().find(|e| e.category_id == id) {
                Some(entry) => entry.enabled = enabled,
                None => status.entries.push(RolloverEntry {
                    category_id: id,
                    enabled,
                }),
            }
            Payload::RolloverStatus(status)
        });

        match self.backend.set_rollover(category_id, &month, enabled).await {
            Ok(()) => {
                tx.commit();
                self.effects.settle(MutationKind::SetRollover);
                Ok(())
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Save the note for one month, replacing any existing note.
    #[tracing::instrument(skip(self, body))]
    pub async fn save_month_note(
        &self,
        month: MonthKey,
        body: &str,
    ) -> Result<MonthNote, SyncError> {
        let key = QueryKey::for_month(QueryName::MonthNotes, self.mode, month.clone());
        let tx = CacheTransaction::begin(&self.store, std::slice::from_ref(&key));
        let optimistic = MonthNote {
            month: month.clone(),
            body: body.to_string(),
            updated_at: Utc::now(),
        };
        tx.stage(&self.store, &key, |current| {
            let mut notes = match current {
                Some(Payload::MonthNotes(notes)) => notes,
                _ => Vec::new(),
            };
            notes.retain(|n| n.month != optimistic.month);
            notes.push(optimistic);
            Payload::MonthNotes(notes)
        });

        match self.backend.save_month_note(&month, body).await {
            Ok(note) => {
                tx.commit();
                let confirmed = note.clone();
                self.store.set_with(key, move |current| {
                    let mut notes = match current {
                        Some(Payload::MonthNotes(notes)) => notes,
                        _ => Vec::new(),
                    };
                    notes.retain(|n| n.month != confirmed.month);
                    notes.push(confirmed);
                    Payload::MonthNotes(notes)
                });
                self.effects.settle(MutationKind::SaveMonthNote);
                Ok(note)
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Move a month's note to the archive.
    ///
    /// The archived row's id is server-assigned, so only the removal is
    /// projected optimistically; the confirmed row is appended on success.
    #[tracing::instrument(skip(self))]
    pub async fn archive_note(&self, month: MonthKey) -> Result<ArchivedNote, SyncError> {
        let notes_key = QueryKey::for_month(QueryName::MonthNotes, self.mode, month.clone());
        let archive_key = self.key(QueryName::ArchivedNotes);
        let tx =
            CacheTransaction::begin(&self.store, &[notes_key.clone(), archive_key.clone()]);

        let removed_month = month.clone();
        tx.stage(&self.store, &notes_key, |current| {
            let mut notes = match current {
                Some(Payload::MonthNotes(notes)) => notes,
                _ => Vec::new(),
            };
            notes.retain(|n| n.month != removed_month);
            Payload::MonthNotes(notes)
        });

        match self.backend.archive_note(&month).await {
            Ok(archived) => {
                tx.commit();
                let confirmed = archived.clone();
                self.store.set_with(archive_key, move |current| {
                    let mut rows = match current {
                        Some(Payload::ArchivedNotes(rows)) => rows,
                        _ => Vec::new(),
                    };
                    rows.retain(|r| r.id != confirmed.id);
                    rows.push(confirmed);
                    Payload::ArchivedNotes(rows)
                });
                self.effects.settle(MutationKind::ArchiveNote);
                Ok(archived)
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Reorder the saved report views.
    ///
    /// Settlement only marks the query stale: the views grid owns the
    /// transient client-side order, and an eager refetch would overwrite
    /// it before the server confirms the new positions.
    #[tracing::instrument(skip(self))]
    pub async fn reorder_saved_views(&self, ordered_ids: Vec<String>) -> Result<(), SyncError> {
        let key = self.key(QueryName::SavedViews);
        let tx = CacheTransaction::begin(&self.store, std::slice::from_ref(&key));
        let order = ordered_ids.clone();
        tx.stage(&self.store, &key, |current| {
            let mut views = match current {
                Some(Payload::SavedViews(views)) => views,
                _ => Normalized::default(),
            };
            for (position, id) in order.iter().enumerate() {
                views.update(id, |v| v.sort_order = position as i32);
            }
            let resorted =
                Normalized::from_list_sorted_by(
                    views.iter_ordered().cloned().collect(),
                    |v| v.sort_order,
                );
            Payload::SavedViews(resorted)
        });

        match self.backend.reorder_saved_views(ordered_ids).await {
            Ok(()) => {
                tx.commit();
                self.effects.settle(MutationKind::ReorderSavedViews);
                Ok(())
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }

    /// Update a goal's target.
    #[tracing::instrument(skip(self))]
    pub async fn update_goal(
        &self,
        goal_id: &str,
        target_amount: i64,
        due_month: Option<MonthKey>,
    ) -> Result<GoalSummary, SyncError> {
        let key = self.key(QueryName::Goals);
        let tx = CacheTransaction::begin(&self.store, std::slice::from_ref(&key));
        let id = goal_id.to_string();
        let projected_due = due_month.clone();
        tx.stage(&self.store, &key, |current| {
            let mut goals = match current {
                Some(Payload::Goals(goals)) => goals,
                _ => Vec::new(),
            };
            if let Some(goal) = goals.iter_mut().find(|g| g.id == id) {
                goal.target_amount = target_amount;
                if projected_due.is_some() {
                    goal.due_month = projected_due;
                }
            }
            Payload::Goals(goals)
        });

        match self
            .backend
            .update_goal(goal_id, target_amount, due_month)
            .await
        {
            Ok(goal) => {
                tx.commit();
                let confirmed = goal.clone();
                self.store.set_with(key, move |current| {
                    let mut goals = match current {
                        Some(Payload::Goals(goals)) => goals,
                        _ => Vec::new(),
                    };
                    match goals.iter_mut().find(|g| g.id == confirmed.id) {
                        Some(existing) => *existing = confirmed,
                        None => goals.push(confirmed),
                    }
                    Payload::Goals(goals)
                });
                self.effects.settle(MutationKind::UpdateGoal);
                Ok(goal)
            }
            Err(err) => Err(self.fail(tx, err)),
        }
    }
}
