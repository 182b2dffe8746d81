//! Query name constants.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Every query the cache layer knows about.
///
/// A query that is not listed here cannot be registered, invalidated, or
/// polled; adding a resource starts with adding its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QueryName {
    /// Month overview: to-be-budgeted, activity, age of money.
    Dashboard,
    /// Savings-goal ("stash") items.
    Stash,
    /// Goal summaries across stash items.
    Goals,
    /// Derived: funds available to allocate. Depends on dashboard, stash,
    /// and goals.
    AvailableFunds,
    /// Normalized category groups and categories.
    CategoryStore,
    /// Categories with no mapping to a stash item.
    UnmappedCategories,
    /// Notes for one month.
    MonthNotes,
    /// Archived notes across months.
    ArchivedNotes,
    /// User-defined saved report views.
    SavedViews,
    /// Per-category rollover state for one month.
    RolloverStatus,
    /// Free-text search results.
    SearchResults,
    /// One page of the transaction list.
    TransactionsPage,
}

impl QueryName {
    /// All known query names.
    pub const ALL: &'static [QueryName] = &[
        QueryName::Dashboard,
        QueryName::Stash,
        QueryName::Goals,
        QueryName::AvailableFunds,
        QueryName::CategoryStore,
        QueryName::UnmappedCategories,
        QueryName::MonthNotes,
        QueryName::ArchivedNotes,
        QueryName::SavedViews,
        QueryName::RolloverStatus,
        QueryName::SearchResults,
        QueryName::TransactionsPage,
    ];

    /// Stable string form, used in keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryName::Dashboard => "dashboard",
            QueryName::Stash => "stash",
            QueryName::Goals => "goals",
            QueryName::AvailableFunds => "availableFunds",
            QueryName::CategoryStore => "categoryStore",
            QueryName::UnmappedCategories => "unmappedCategories",
            QueryName::MonthNotes => "monthNotes",
            QueryName::ArchivedNotes => "archivedNotes",
            QueryName::SavedViews => "savedViews",
            QueryName::RolloverStatus => "rolloverStatus",
            QueryName::SearchResults => "searchResults",
            QueryName::TransactionsPage => "transactionsPage",
        }
    }
}

impl fmt::Display for QueryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
