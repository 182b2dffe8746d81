//! Error types for sync operations.

use thiserror::Error;

use tally_registry::{Page, QueryName};
use tally_remote::RemoteError;

/// Errors that can occur in mutation and sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The data-access backend failed.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The rate-limit gate is set; the call was refused before any remote
    /// work happened.
    #[error("rate limited, sync refused")]
    RateLimited,

    /// A sync for this page is already in flight.
    #[error("sync already in flight for page {page}")]
    AlreadySyncing { page: Page },

    /// A full sync is already in flight.
    #[error("full sync already in flight")]
    FullSyncRunning,

    /// The page has no requirement entry.
    #[error("page {page} missing from page map")]
    UnknownPage { page: Page },

    /// A background refresh was requested for a query that has none.
    #[error("query {query} has no background refresh")]
    NotPollable { query: QueryName },
}

impl SyncError {
    /// Whether the error is either form of rate limiting (the pre-emptive
    /// gate or the provider's own 429).
    pub fn is_rate_limited(&self) -> bool {
        match self {
            SyncError::RateLimited => true,
            SyncError::Remote(remote) => remote.is_rate_limited(),
            _ => false,
        }
    }
}
