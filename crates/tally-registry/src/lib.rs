//! Static configuration tables for Tally's consistency layer.
//!
//! This crate provides:
//! - The query name and query key model (mode-partitioned, parameterized)
//! - The query registry: per-query dependencies, staleness, and GC config
//! - The mutation effect table: which queries each mutation invalidates
//!   or marks stale on settlement
//! - The page requirement map: which queries a page-scoped sync refetches
//!   eagerly vs. lazily
//!
//! Everything here is immutable data built once at session startup and
//! passed by reference into the sync machinery, so tests can substitute
//! alternate graphs.

pub mod effects;
pub mod key;
pub mod names;
pub mod pages;
pub mod registry;

pub use effects::{EffectTable, MutationEffect, MutationKind};
pub use key::{KeyParam, MonthKey, QueryKey, SessionMode};
pub use names::QueryName;
pub use pages::{Page, PageMap, PageRequirement, SyncScope};
pub use registry::{ConfigError, QueryConfig, QueryRegistry};
