//! Data-access backends for Tally.
//!
//! This crate provides:
//! - The typed payloads the provider exposes (dashboard, stash items,
//!   categories, notes, saved views, transactions)
//! - The `DataAccess` capability trait, one async method per resource
//! - `RemoteBackend`, the live HTTP implementation
//! - `DemoBackend`, a structurally identical offline implementation
//!
//! A session selects one implementation at startup; nothing above this
//! crate branches on the mode per call.

pub mod access;
pub mod demo;
pub mod error;
pub mod remote;
pub mod types;

pub use access::DataAccess;
pub use demo::DemoBackend;
pub use error::RemoteError;
pub use remote::RemoteBackend;
pub use types::{
    Allocation, ArchivedNote, Category, CategoryGroup, CategoryStorePayload, Dashboard,
    GoalSummary, MonthNote, RolloverEntry, RolloverStatus, SavedView, SearchHit, StashItem,
    StashPatch, StashStatus, Transaction, TransactionsPage,
};
