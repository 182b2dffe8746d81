//! The cache value type.
//!
//! The store is generic; this enum is the one payload type the session
//! instantiates it with. List-shaped resources are normalized on the way
//! in so optimistic projections can edit one item without reprocessing the
//! whole payload.

use std::collections::HashMap;

use tally_cache::Normalized;
use tally_registry::MonthKey;
use tally_remote::{
    ArchivedNote, Category, CategoryGroup, CategoryStorePayload, Dashboard, GoalSummary,
    MonthNote, RolloverStatus, SavedView, SearchHit, StashItem, TransactionsPage,
};

/// Normalized category store: groups and categories, each id-indexed with
/// an explicit order.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryStore {
    pub groups: Normalized<CategoryGroup>,
    pub categories: Normalized<Category>,
}

impl CategoryStore {
    /// Normalize the raw payload.
    ///
    /// Categories sort by their group's order first, then their own item
    /// order; the sort is stable, so provider order breaks ties. A
    /// category pointing at an unknown group sorts last.
    pub fn from_payload(payload: CategoryStorePayload) -> Self {
        let group_order: HashMap<String, i32> = payload
            .groups
            .iter()
            .map(|g| (g.id.clone(), g.group_order))
            .collect();

        let groups = Normalized::from_list_sorted_by(payload.groups, |g| g.group_order);
        let categories = Normalized::from_list_sorted_by(payload.categories, |c| {
            (
                group_order.get(&c.group_id).copied().unwrap_or(i32::MAX),
                c.item_order,
            )
        });

        Self { groups, categories }
    }
}

/// Client-side derivation over dashboard, stash, and goals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableFunds {
    pub month: MonthKey,
    /// Milliunits still unallocated this month.
    pub to_be_budgeted: i64,
    /// Milliunits planned across all stash items this month.
    pub planned_this_month: i64,
    /// Milliunits of goal targets not yet funded.
    pub unfunded_target_total: i64,
}

impl AvailableFunds {
    pub fn derive(dashboard: &Dashboard, stash: &Normalized<StashItem>, goals: &[GoalSummary]) -> Self {
        Self {
            month: dashboard.month.clone(),
            to_be_budgeted: dashboard.to_be_budgeted,
            planned_this_month: stash.iter_ordered().map(|s| s.planned_budget).sum(),
            unfunded_target_total: goals
                .iter()
                .map(|g| (g.target_amount - g.funded_amount).max(0))
                .sum(),
        }
    }
}

/// One cached value, tagged by the query family it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Dashboard(Dashboard),
    Stash(Normalized<StashItem>),
    Goals(Vec<GoalSummary>),
    AvailableFunds(AvailableFunds),
    CategoryStore(CategoryStore),
    UnmappedCategories(Vec<String>),
    MonthNotes(Vec<MonthNote>),
    ArchivedNotes(Vec<ArchivedNote>),
    SavedViews(Normalized<SavedView>),
    RolloverStatus(RolloverStatus),
    SearchResults(Vec<SearchHit>),
    Transactions(TransactionsPage),
}

impl Payload {
    pub fn as_dashboard(&self) -> Option<&Dashboard> {
        match self {
            Payload::Dashboard(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_stash(&self) -> Option<&Normalized<StashItem>> {
        match self {
            Payload::Stash(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_goals(&self) -> Option<&[GoalSummary]> {
        match self {
            Payload::Goals(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_available_funds(&self) -> Option<&AvailableFunds> {
        match self {
            Payload::AvailableFunds(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_category_store(&self) -> Option<&CategoryStore> {
        match self {
            Payload::CategoryStore(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_month_notes(&self) -> Option<&[MonthNote]> {
        match self {
            Payload::MonthNotes(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_saved_views(&self) -> Option<&Normalized<SavedView>> {
        match self {
            Payload::SavedViews(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_rollover_status(&self) -> Option<&RolloverStatus> {
        match self {
            Payload::RolloverStatus(r) => Some(r),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn group(id: &str, order: i32) -> CategoryGroup {
        CategoryGroup {
            id: id.to_string(),
            name: id.to_string(),
            group_order: order,
        }
    }

    fn category(id: &str, group_id: &str, item_order: i32) -> Category {
        Category {
            id: id.to_string(),
            group_id: group_id.to_string(),
            name: id.to_string(),
            linked_account_id: None,
            item_order,
        }
    }

    #[test]
    fn categories_sort_by_group_then_item() {
        let store = CategoryStore::from_payload(CategoryStorePayload {
            groups: vec![group("g-late", 1), group("g-early", 0)],
            categories: vec![
                category("c-late-0", "g-late", 0),
                category("c-early-1", "g-early", 1),
                category("c-early-0", "g-early", 0),
            ],
        });

        assert_eq!(
            store.groups.order(),
            &["g-early".to_string(), "g-late".to_string()]
        );
        assert_eq!(
            store.categories.order(),
            &[
                "c-early-0".to_string(),
                "c-early-1".to_string(),
                "c-late-0".to_string(),
            ]
        );
    }

    #[test]
    fn orphan_category_sorts_last() {
        let store = CategoryStore::from_payload(CategoryStorePayload {
            groups: vec![group("g", 5)],
            categories: vec![category("c-orphan", "g-missing", 0), category("c", "g", 0)],
        });

        assert_eq!(
            store.categories.order(),
            &["c".to_string(), "c-orphan".to_string()]
        );
    }

    #[test]
    fn available_funds_sums_planned_and_unfunded() {
        let dashboard = Dashboard {
            month: MonthKey::new(2026, 8),
            to_be_budgeted: 400_000,
            activity: -10_000,
            age_of_money: None,
        };
        let mut item = StashItem {
            id: "s1".to_string(),
            name: "Vacation".to_string(),
            planned_budget: 150_000,
            balance: 250_000,
            target_amount: Some(1_000_000),
            progress_percent: 0,
            status: tally_remote::StashStatus::Empty,
        };
        item.recompute_progress();
        let stash = Normalized::from_list(vec![item]);
        let goals = vec![GoalSummary {
            id: "g1".to_string(),
            stash_id: "s1".to_string(),
            name: "Vacation".to_string(),
            target_amount: 1_000_000,
            funded_amount: 250_000,
            due_month: None,
        }];

        let funds = AvailableFunds::derive(&dashboard, &stash, &goals);
        assert_eq!(funds.to_be_budgeted, 400_000);
        assert_eq!(funds.planned_this_month, 150_000);
        assert_eq!(funds.unfunded_target_total, 750_000);
    }
}
