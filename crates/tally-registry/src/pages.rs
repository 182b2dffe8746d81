//! The page requirement map.
//!
//! A page-scoped "sync now" action invalidates the page's primary queries
//! (refetch immediately), marks its supporting queries stale (refetch on
//! next view), and passes the page's sync scope to the remote sync call so
//! the backend can narrow its own work.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::names::QueryName;
use crate::registry::{ConfigError, QueryRegistry};

/// Application pages with a sync action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Page {
    Dashboard,
    Budget,
    Stash,
    Notes,
    Reports,
    Settings,
}

impl Page {
    pub fn as_str(&self) -> &'static str {
        match self {
            Page::Dashboard => "dashboard",
            Page::Budget => "budget",
            Page::Stash => "stash",
            Page::Notes => "notes",
            Page::Reports => "reports",
            Page::Settings => "settings",
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scope hint passed to the remote sync endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncScope {
    /// Resynchronize everything.
    Full,
    /// Account balances and transactions only.
    Accounts,
    /// Budget allocations and categories only.
    Budget,
    /// Notes only.
    Notes,
}

impl SyncScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncScope::Full => "full",
            SyncScope::Accounts => "accounts",
            SyncScope::Budget => "budget",
            SyncScope::Notes => "notes",
        }
    }
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What one page needs from a scoped sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequirement {
    /// Refetched immediately on sync.
    pub primary: Vec<QueryName>,
    /// Marked stale; refetched lazily on next view.
    pub supporting: Vec<QueryName>,
    /// Backend scope hint.
    pub sync_scope: SyncScope,
}

impl PageRequirement {
    fn new(primary: &[QueryName], supporting: &[QueryName], sync_scope: SyncScope) -> Self {
        Self {
            primary: primary.to_vec(),
            supporting: supporting.to_vec(),
            sync_scope,
        }
    }
}

/// Immutable page → requirement table.
#[derive(Debug, Clone)]
pub struct PageMap {
    requirements: HashMap<Page, PageRequirement>,
}

impl PageMap {
    /// Build a map from explicit entries.
    pub fn from_entries(entries: impl IntoIterator<Item = (Page, PageRequirement)>) -> Self {
        Self {
            requirements: entries.into_iter().collect(),
        }
    }

    /// The standard production map.
    pub fn standard() -> Self {
        use QueryName::*;

        Self::from_entries([
            (
                Page::Dashboard,
                PageRequirement::new(
                    &[Dashboard, AvailableFunds],
                    &[Stash, Goals, CategoryStore],
                    SyncScope::Accounts,
                ),
            ),
            (
                Page::Budget,
                PageRequirement::new(
                    &[CategoryStore, Dashboard],
                    &[UnmappedCategories, RolloverStatus],
                    SyncScope::Budget,
                ),
            ),
            (
                Page::Stash,
                PageRequirement::new(
                    &[Stash, Goals],
                    &[AvailableFunds, Dashboard],
                    SyncScope::Budget,
                ),
            ),
            (
                Page::Notes,
                PageRequirement::new(
                    &[MonthNotes],
                    &[CategoryStore, ArchivedNotes],
                    SyncScope::Notes,
                ),
            ),
            (
                Page::Reports,
                PageRequirement::new(
                    &[TransactionsPage],
                    &[Dashboard, CategoryStore],
                    SyncScope::Accounts,
                ),
            ),
            (
                Page::Settings,
                PageRequirement::new(&[SavedViews], &[], SyncScope::Full),
            ),
        ])
    }

    /// Look up a page's requirement. Same missing-entry policy as the
    /// registry.
    pub fn requirement(&self, page: Page) -> Option<&PageRequirement> {
        let requirement = self.requirements.get(&page);
        if requirement.is_none() {
            debug_assert!(false, "page {page} missing from page map");
            error!(page = %page, "page missing from page map");
        }
        requirement
    }

    /// Queries refetched immediately on a page sync.
    pub fn primary_queries(&self, page: Page) -> &[QueryName] {
        self.requirement(page).map_or(&[], |r| &r.primary)
    }

    /// Every query the page touches, primary first.
    pub fn all_queries(&self, page: Page) -> Vec<QueryName> {
        self.requirement(page)
            .map(|r| r.primary.iter().chain(&r.supporting).copied().collect())
            .unwrap_or_default()
    }

    /// The page's backend sync scope.
    pub fn sync_scope(&self, page: Page) -> Option<SyncScope> {
        self.requirement(page).map(|r| r.sync_scope)
    }

    /// Check that primary and supporting are disjoint and every query is
    /// registered.
    pub fn validate(&self, registry: &QueryRegistry) -> Result<(), ConfigError> {
        for (page, requirement) in &self.requirements {
            for query in &requirement.primary {
                if requirement.supporting.contains(query) {
                    return Err(ConfigError::OverlappingPageLists {
                        page: page.to_string(),
                        query: *query,
                    });
                }
            }
            for query in requirement.primary.iter().chain(&requirement.supporting) {
                if !registry.is_registered(*query) {
                    return Err(ConfigError::UnregisteredPageQuery {
                        page: page.to_string(),
                        query: *query,
                    });
                }
            }
        }
        Ok(())
    }
}
