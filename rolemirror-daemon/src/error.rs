use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the continuous-mode runtime, bootstrap and socket protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] rolemirror_core::ConfigError),

    #[error("role store error: {0}")]
    Store(#[from] rolemirror_sync::StoreError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] rolemirror_sync::PipelineError),

    #[error("source error: {0}")]
    Source(#[from] rolemirror_source::SourceError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
