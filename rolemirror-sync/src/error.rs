//! Error types for rolemirror-sync.

use std::path::PathBuf;

use thiserror::Error;

use rolemirror_core::{GroupId, RoleKey};

/// Failure of the bulk-read collaborator while listing a group's members.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request could not be sent or the connection failed.
    #[error("member listing request failed for group {group}: {message}")]
    Request { group: GroupId, message: String },

    /// The source answered with a non-success status.
    #[error("member listing for group {group} returned HTTP {status}: {body}")]
    Status {
        group: GroupId,
        status: u16,
        body: String,
    },

    /// The response body was not a member page.
    #[error("failed to decode member page for group {group}: {message}")]
    Decode { group: GroupId, message: String },

    /// The per-request timeout elapsed.
    #[error("member listing for group {group} timed out")]
    Timeout { group: GroupId },
}

/// Failure of the persistence collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Row document could not be encoded or decoded.
    #[error("role store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The backing store refused or could not serve the request.
    #[error("role store unavailable: {0}")]
    Unavailable(String),
}

/// Per-group and per-member failures observed during reconciliation.
///
/// None of these abort the process: a fetch failure fails one group, sync and
/// prune failures are isolated to one key.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("fetch failed for group {group}: {source}")]
    Fetch {
        group: GroupId,
        #[source]
        source: FetchError,
    },

    #[error("failed to sync {key}: {source}")]
    Sync {
        key: RoleKey,
        #[source]
        source: StoreError,
    },

    #[error("failed to prune stale entry {key}: {source}")]
    Prune {
        key: RoleKey,
        #[source]
        source: StoreError,
    },
}

/// Errors from the shared pipeline entrypoint.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Initial load from the sink failed; the cache cannot be seeded.
    #[error("failed to load persisted roles: {0}")]
    Store(#[from] StoreError),

    /// A reconcile was requested for a group that is not configured.
    #[error("group {0} is not configured")]
    UnknownGroup(GroupId),
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
