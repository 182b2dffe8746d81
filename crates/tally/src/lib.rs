//! Tally's client-side data-consistency layer.
//!
//! Wires the cache store, the static query tables, a data-access backend,
//! and the sync machinery into one `Session` the UI layer talks to:
//! - Typed read entry points serving fresh cache hits or refetching
//!   through the generation protocol
//! - One optimistic write entry point per mutation, with verbatim rollback
//!   on rejection and effect-table propagation on settlement
//! - Page-scoped and full "sync now", plus a background refresh scheduler

pub mod mutations;
pub mod payload;
pub mod queries;
pub mod session;

pub use payload::{AvailableFunds, CategoryStore, Payload};
pub use queries::QueryState;
pub use session::{Session, SessionConfig};

// The pieces a UI embedding needs without depending on the sub-crates
// directly.
pub use tally_cache::{CacheEvent, Keyed, Normalized, RefetchPolicy};
pub use tally_registry::{MonthKey, MutationKind, Page, QueryKey, QueryName, SessionMode};
pub use tally_remote::{DataAccess, RemoteError};
pub use tally_sync::SyncError;

/// Install the process-wide tracing subscriber.
///
/// Filter defaults to `tally=info`; override with `RUST_LOG`.
pub fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tally=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
