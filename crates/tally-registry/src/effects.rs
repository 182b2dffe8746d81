//! The mutation effect table.
//!
//! Each mutation kind maps to the queries it invalidates (immediate
//! refetch) and the queries it marks stale (lazy refetch on next access).
//! Immediate invalidation is reserved for data the user is looking at when
//! the mutation settles; derived or other-page queries are marked stale so
//! the refetch happens only if someone actually navigates there.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::names::QueryName;
use crate::registry::{ConfigError, QueryRegistry};

/// Every mutation the sync layer propagates effects for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationKind {
    /// Change one stash item's planned budget.
    AllocateFunds,
    /// Allocate across many stash items in one call.
    BatchAllocate,
    /// Create a stash item.
    CreateStashItem,
    /// Delete a stash item.
    DeleteStashItem,
    /// Rename a category.
    RenameCategory,
    /// Remove the link between a category and its account.
    RemoveLinkedCategory,
    /// Toggle a category's month rollover.
    SetRollover,
    /// Save the note for a month.
    SaveMonthNote,
    /// Archive a month note.
    ArchiveNote,
    /// Reorder the saved report views.
    ReorderSavedViews,
    /// Update a goal target.
    UpdateGoal,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::AllocateFunds => "allocateFunds",
            MutationKind::BatchAllocate => "batchAllocate",
            MutationKind::CreateStashItem => "createStashItem",
            MutationKind::DeleteStashItem => "deleteStashItem",
            MutationKind::RenameCategory => "renameCategory",
            MutationKind::RemoveLinkedCategory => "removeLinkedCategory",
            MutationKind::SetRollover => "setRollover",
            MutationKind::SaveMonthNote => "saveMonthNote",
            MutationKind::ArchiveNote => "archiveNote",
            MutationKind::ReorderSavedViews => "reorderSavedViews",
            MutationKind::UpdateGoal => "updateGoal",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The queries a settled mutation touches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationEffect {
    /// Refetch now.
    pub invalidate: Vec<QueryName>,
    /// Refetch on next access.
    pub mark_stale: Vec<QueryName>,
}

impl MutationEffect {
    fn new(invalidate: &[QueryName], mark_stale: &[QueryName]) -> Self {
        Self {
            invalidate: invalidate.to_vec(),
            mark_stale: mark_stale.to_vec(),
        }
    }

    /// An entry with no targets: settlement deliberately leaves the cache
    /// alone and trusts the optimistic projection until staleTime elapses.
    fn suppressed() -> Self {
        Self::default()
    }
}

/// Immutable mutation-kind → effect table.
#[derive(Debug, Clone)]
pub struct EffectTable {
    effects: HashMap<MutationKind, MutationEffect>,
}

impl EffectTable {
    /// Build a table from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (MutationKind, MutationEffect)>) -> Self {
        Self {
            effects: entries.into_iter().collect(),
        }
    }

    /// The standard production table.
    pub fn standard() -> Self {
        use QueryName::*;

        Self::from_entries([
            (
                MutationKind::AllocateFunds,
                MutationEffect::new(&[Stash], &[AvailableFunds, Dashboard, Goals]),
            ),
            // The provider is eventually consistent after batch writes: an
            // eager refetch would round-trip stale amounts over the
            // optimistic projection. The ambient staleTime pulls fresh data
            // once the consistency window has passed.
            (MutationKind::BatchAllocate, MutationEffect::suppressed()),
            (
                MutationKind::CreateStashItem,
                MutationEffect::new(&[Stash, Goals], &[AvailableFunds, Dashboard]),
            ),
            (
                MutationKind::DeleteStashItem,
                MutationEffect::new(&[Stash, Goals], &[AvailableFunds, Dashboard]),
            ),
            (
                MutationKind::RenameCategory,
                MutationEffect::new(&[CategoryStore], &[UnmappedCategories]),
            ),
            (
                MutationKind::RemoveLinkedCategory,
                MutationEffect::new(&[CategoryStore], &[UnmappedCategories, Dashboard]),
            ),
            (
                MutationKind::SetRollover,
                MutationEffect::new(&[RolloverStatus], &[Dashboard, CategoryStore]),
            ),
            (
                MutationKind::SaveMonthNote,
                MutationEffect::new(&[MonthNotes], &[]),
            ),
            (
                MutationKind::ArchiveNote,
                MutationEffect::new(&[MonthNotes, ArchivedNotes], &[]),
            ),
            // The saved-views grid manages its own client-side order until
            // the server round-trips the new sortOrder; invalidating here
            // would overwrite the transient order, so the query is only
            // marked stale.
            (
                MutationKind::ReorderSavedViews,
                MutationEffect::new(&[], &[SavedViews]),
            ),
            (
                MutationKind::UpdateGoal,
                MutationEffect::new(&[Goals], &[AvailableFunds, Dashboard]),
            ),
        ])
    }

    /// Look up a mutation's effect.
    ///
    /// Missing entries follow the registry's policy: fatal in debug,
    /// logged in release.
    pub fn effect(&self, kind: MutationKind) -> Option<&MutationEffect> {
        let effect = self.effects.get(&kind);
        if effect.is_none() {
            debug_assert!(false, "mutation {kind} missing from effect table");
            error!(mutation = %kind, "mutation missing from effect table");
        }
        effect
    }

    /// Queries a settled mutation must refetch immediately.
    pub fn invalidation_targets(&self, kind: MutationKind) -> &[QueryName] {
        self.effect(kind).map_or(&[], |e| &e.invalidate)
    }

    /// Queries a settled mutation marks for lazy refetch.
    pub fn stale_targets(&self, kind: MutationKind) -> &[QueryName] {
        self.effect(kind).map_or(&[], |e| &e.mark_stale)
    }

    /// Check that no query appears in both lists for one mutation and that
    /// every target is registered.
    pub fn validate(&self, registry: &QueryRegistry) -> Result<(), ConfigError> {
        for (kind, effect) in &self.effects {
            for query in &effect.invalidate {
                if effect.mark_stale.contains(query) {
                    return Err(ConfigError::AmbiguousEffect {
                        mutation: kind.to_string(),
                        query: *query,
                    });
                }
            }
            for query in effect.invalidate.iter().chain(&effect.mark_stale) {
                if !registry.is_registered(*query) {
                    return Err(ConfigError::UnregisteredEffectTarget {
                        mutation: kind.to_string(),
                        query: *query,
                    });
                }
            }
        }
        Ok(())
    }
}
