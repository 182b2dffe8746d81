//! Typed payloads exchanged with the data provider.
//!
//! Amounts are milliunits (1/1000 of the currency unit), matching the
//! provider's wire representation, so arithmetic stays integral.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_cache::Keyed;
use tally_registry::MonthKey;

/// Month overview numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dashboard {
    pub month: MonthKey,
    /// Milliunits left to allocate this month.
    pub to_be_budgeted: i64,
    /// Milliunits of activity this month.
    pub activity: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_of_money: Option<i64>,
}

/// Funding state of a stash item, derived from its amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StashStatus {
    /// Balance meets or exceeds the target.
    Funded,
    /// Money set aside this month and progressing.
    OnTrack,
    /// Has a target but no allocation this month.
    Underfunded,
    /// Nothing saved and nothing planned.
    Empty,
}

/// A savings-goal ("stash") item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashItem {
    pub id: String,
    pub name: String,
    /// Milliunits planned for this month.
    pub planned_budget: i64,
    /// Milliunits saved so far.
    pub balance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<i64>,
    /// Percent of target saved, clamped to 0..=100.
    pub progress_percent: u8,
    pub status: StashStatus,
}

impl StashItem {
    /// Recompute `progress_percent` and `status` from the amounts.
    ///
    /// This is the same derivation the provider applies server-side;
    /// optimistic projections reuse it so the local value matches what a
    /// later refetch would return.
    pub fn recompute_progress(&mut self) {
        match self.target_amount {
            Some(target) if target > 0 => {
                let pct = (self.balance.max(0) * 100) / target;
                self.progress_percent = pct.clamp(0, 100) as u8;
                self.status = if self.balance >= target {
                    StashStatus::Funded
                } else if self.planned_budget > 0 {
                    StashStatus::OnTrack
                } else {
                    StashStatus::Underfunded
                };
            }
            _ => {
                self.progress_percent = if self.balance > 0 { 100 } else { 0 };
                self.status = if self.balance > 0 || self.planned_budget > 0 {
                    StashStatus::OnTrack
                } else {
                    StashStatus::Empty
                };
            }
        }
    }
}

impl Keyed for StashItem {
    type Id = String;

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Partial update for a stash item.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StashPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_budget: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<i64>,
}

/// One allocation in a batch write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub stash_id: String,
    /// Milliunits to set as the planned budget.
    pub amount: i64,
}

/// A category group header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub id: String,
    pub name: String,
    pub group_order: i32,
}

impl Keyed for CategoryGroup {
    type Id = String;

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// A budget category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub group_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linked_account_id: Option<String>,
    pub item_order: i32,
}

impl Keyed for Category {
    type Id = String;

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Raw category-store payload: flat lists the cache layer normalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStorePayload {
    pub groups: Vec<CategoryGroup>,
    pub categories: Vec<Category>,
}

/// A goal summary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoalSummary {
    pub id: String,
    pub stash_id: String,
    pub name: String,
    pub target_amount: i64,
    pub funded_amount: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_month: Option<MonthKey>,
}

/// The note for one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthNote {
    pub month: MonthKey,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

/// A note moved to the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedNote {
    pub id: String,
    pub month: MonthKey,
    pub body: String,
    pub archived_at: DateTime<Utc>,
}

/// A user-defined saved report view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedView {
    pub id: String,
    pub name: String,
    pub sort_order: i32,
}

impl Keyed for SavedView {
    type Id = String;

    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Per-category rollover flag for one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloverEntry {
    pub category_id: String,
    pub enabled: bool,
}

/// Rollover state for one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloverStatus {
    pub month: MonthKey,
    pub entries: Vec<RolloverEntry>,
}

/// One transaction row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub date: DateTime<Utc>,
    pub payee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,
    pub amount: i64,
}

/// One page of the transaction list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionsPage {
    pub items: Vec<Transaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// A free-text search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub kind: String,
    pub label: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn stash(planned: i64, balance: i64, target: Option<i64>) -> StashItem {
        let mut item = StashItem {
            id: "s1".to_string(),
            name: "Vacation".to_string(),
            planned_budget: planned,
            balance,
            target_amount: target,
            progress_percent: 0,
            status: StashStatus::Empty,
        };
        item.recompute_progress();
        item
    }

    #[test_case(0, 50_000, Some(50_000), 100, StashStatus::Funded; "balance at target")]
    #[test_case(10_000, 25_000, Some(50_000), 50, StashStatus::OnTrack; "planned and halfway")]
    #[test_case(0, 25_000, Some(50_000), 50, StashStatus::Underfunded; "no plan this month")]
    #[test_case(0, 0, None, 0, StashStatus::Empty; "nothing at all")]
    #[test_case(5_000, 0, None, 0, StashStatus::OnTrack; "targetless but planned")]
    fn progress_derivation(
        planned: i64,
        balance: i64,
        target: Option<i64>,
        pct: u8,
        status: StashStatus,
    ) {
        let item = stash(planned, balance, target);
        assert_eq!(item.progress_percent, pct);
        assert_eq!(item.status, status);
    }

    #[test]
    fn progress_is_clamped_above_target() {
        let item = stash(0, 150_000, Some(50_000));
        assert_eq!(item.progress_percent, 100);
        assert_eq!(item.status, StashStatus::Funded);
    }

    #[test]
    fn negative_balance_clamps_to_zero() {
        let item = stash(1_000, -5_000, Some(50_000));
        assert_eq!(item.progress_percent, 0);
        assert_eq!(item.status, StashStatus::OnTrack);
    }
}
