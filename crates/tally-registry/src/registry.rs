//! The query registry: per-query dependency, staleness, and GC config.

use std::collections::{BTreeSet, HashMap};

use chrono::Duration;
use tracing::error;

use crate::effects::EffectTable;
use crate::names::QueryName;
use crate::pages::PageMap;

/// Configuration for one registered query.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Queries whose data this one is derived from. Advisory: the effect
    /// table is what actually propagates invalidation, and `validate`
    /// checks the two stay consistent.
    pub depends_on: BTreeSet<QueryName>,
    /// Age past which the cached value is refetch-eligible.
    pub stale_time: Duration,
    /// How long an unwatched entry survives before eviction.
    pub gc_time: Duration,
    /// Whether the background scheduler refreshes this query.
    pub pollable: bool,
}

impl QueryConfig {
    fn new(stale_time: Duration, gc_time: Duration, pollable: bool) -> Self {
        Self {
            depends_on: BTreeSet::new(),
            stale_time,
            gc_time,
            pollable,
        }
    }

    fn depends_on(mut self, deps: &[QueryName]) -> Self {
        self.depends_on = deps.iter().copied().collect();
        self
    }
}

/// Validation failures across the registry, effect table, and page map.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A `depends_on` entry names a query with no registered config.
    #[error("query {query} depends on unregistered query {dependency}")]
    UnknownDependency {
        query: QueryName,
        dependency: QueryName,
    },

    /// A mutation lists the same query in both invalidate and mark-stale.
    #[error("mutation {mutation} lists {query} in both invalidate and mark-stale")]
    AmbiguousEffect { mutation: String, query: QueryName },

    /// A mutation effect targets a query with no registered config.
    #[error("mutation {mutation} targets unregistered query {query}")]
    UnregisteredEffectTarget { mutation: String, query: QueryName },

    /// A page lists the same query as both primary and supporting.
    #[error("page {page} lists {query} as both primary and supporting")]
    OverlappingPageLists { page: String, query: QueryName },

    /// A page requirement names a query with no registered config.
    #[error("page {page} requires unregistered query {query}")]
    UnregisteredPageQuery { page: String, query: QueryName },
}

/// Immutable table of every query's config.
///
/// Built once at startup and passed by reference into the scheduler and
/// effect engine. Pure lookup, no side effects.
#[derive(Debug, Clone)]
pub struct QueryRegistry {
    configs: HashMap<QueryName, QueryConfig>,
}

impl QueryRegistry {
    /// Build a registry from explicit entries (tests use this to substitute
    /// alternate graphs).
    pub fn from_entries(entries: impl IntoIterator<Item = (QueryName, QueryConfig)>) -> Self {
        Self {
            configs: entries.into_iter().collect(),
        }
    }

    /// The standard production registry.
    pub fn standard() -> Self {
        let minutes = Duration::minutes;
        let seconds = Duration::seconds;

        Self::from_entries([
            (
                QueryName::Dashboard,
                QueryConfig::new(minutes(1), minutes(10), true),
            ),
            (
                QueryName::Stash,
                QueryConfig::new(minutes(1), minutes(10), true),
            ),
            (
                QueryName::Goals,
                QueryConfig::new(minutes(2), minutes(10), true),
            ),
            (
                QueryName::AvailableFunds,
                QueryConfig::new(minutes(1), minutes(10), false).depends_on(&[
                    QueryName::Dashboard,
                    QueryName::Stash,
                    QueryName::Goals,
                ]),
            ),
            (
                QueryName::CategoryStore,
                QueryConfig::new(minutes(5), minutes(30), true),
            ),
            (
                QueryName::UnmappedCategories,
                QueryConfig::new(minutes(5), minutes(30), false)
                    .depends_on(&[QueryName::CategoryStore]),
            ),
            (
                QueryName::MonthNotes,
                QueryConfig::new(minutes(5), minutes(30), false),
            ),
            (
                QueryName::ArchivedNotes,
                QueryConfig::new(minutes(10), minutes(60), false),
            ),
            (
                QueryName::SavedViews,
                QueryConfig::new(minutes(10), minutes(60), false),
            ),
            (
                QueryName::RolloverStatus,
                QueryConfig::new(minutes(5), minutes(30), false)
                    .depends_on(&[QueryName::Dashboard, QueryName::CategoryStore]),
            ),
            (
                QueryName::SearchResults,
                QueryConfig::new(seconds(30), minutes(2), false),
            ),
            (
                QueryName::TransactionsPage,
                QueryConfig::new(minutes(1), minutes(5), true),
            ),
        ])
    }

    /// Look up a query's config.
    ///
    /// An unknown name is a programmer error: an unregistered query would
    /// desynchronize invalidation. Fatal in debug builds, logged in
    /// release, never silently ignored.
    pub fn config(&self, name: QueryName) -> Option<&QueryConfig> {
        let config = self.configs.get(&name);
        if config.is_none() {
            debug_assert!(false, "query {name} missing from registry");
            error!(query = %name, "query missing from registry");
        }
        config
    }

    /// Lookup without the missing-entry policy, for validation passes.
    pub fn is_registered(&self, name: QueryName) -> bool {
        self.configs.contains_key(&name)
    }

    /// Queries the background scheduler should refresh.
    pub fn pollable_queries(&self) -> Vec<QueryName> {
        let mut names: Vec<QueryName> = self
            .configs
            .iter()
            .filter(|(_, c)| c.pollable)
            .map(|(n, _)| *n)
            .collect();
        names.sort();
        names
    }

    /// All registered query names.
    pub fn query_names(&self) -> Vec<QueryName> {
        let mut names: Vec<QueryName> = self.configs.keys().copied().collect();
        names.sort();
        names
    }

    /// Check dependency-graph closure for this registry alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, config) in &self.configs {
            for dep in &config.depends_on {
                if !self.is_registered(*dep) {
                    return Err(ConfigError::UnknownDependency {
                        query: *name,
                        dependency: *dep,
                    });
                }
            }
        }
        Ok(())
    }

    /// Check closure of the whole static graph: registry dependencies,
    /// effect targets, and page requirements.
    pub fn validate_graph(
        &self,
        effects: &EffectTable,
        pages: &PageMap,
    ) -> Result<(), ConfigError> {
        self.validate()?;
        effects.validate(self)?;
        pages.validate(self)?;
        Ok(())
    }
}
