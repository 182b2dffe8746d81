//! Mutation-effect propagation and sync orchestration for Tally.
//!
//! This crate provides:
//! - `CacheTransaction`: the snapshot/project/rollback protocol behind
//!   optimistic mutations
//! - `EffectEngine`: resolves a settled mutation into cache invalidations
//! - `PageSyncCoordinator`: page-scoped "sync now" with rate-limit and
//!   duplicate-sync guards
//! - `SyncScheduler`: background refresh of pollable queries, gated by
//!   visibility and rate-limit state

pub mod engine;
pub mod error;
pub mod gates;
pub mod optimistic;
pub mod page_sync;
pub mod scheduler;

pub use engine::EffectEngine;
pub use error::SyncError;
pub use gates::{RateLimitGate, VisibilityGate};
pub use optimistic::CacheTransaction;
pub use page_sync::PageSyncCoordinator;
pub use scheduler::{PollExecutor, SyncScheduler};
