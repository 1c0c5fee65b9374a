//! Concrete wiring shared by batch and continuous mode.

use std::sync::Arc;

use rolemirror_core::{Config, LogFormat};
use rolemirror_source::HttpMemberSource;
use rolemirror_sync::{FileRoleStore, GroupReport, Pipeline, ReconcileScope};

use crate::error::{io_err, DaemonError};

/// Open the file store under the configured state dir, build the HTTP source,
/// and seed the pipeline's cache.
pub async fn open_pipeline(config: &Config, dry_run: bool) -> Result<Pipeline, DaemonError> {
    let state_dir = config
        .state_dir
        .clone()
        .ok_or(rolemirror_core::ConfigError::Missing("state_dir"))?;
    std::fs::create_dir_all(&state_dir).map_err(|e| io_err(&state_dir, e))?;

    let store = Arc::new(FileRoleStore::open_at(&state_dir)?);
    tracing::debug!(path = %store.path().display(), "opened role store");
    let source = Arc::new(HttpMemberSource::new(&config.source)?);

    Ok(Pipeline::bootstrap(config, store, source, dry_run).await?)
}

/// Reconcile every configured group once.
///
/// Per-group failures are inside the reports; only bootstrap failures are
/// errors.
pub async fn run_batch(config: &Config, dry_run: bool) -> Result<Vec<GroupReport>, DaemonError> {
    let pipeline = open_pipeline(config, dry_run).await?;
    Ok(pipeline.run(ReconcileScope::All).await?)
}

/// Install the global tracing subscriber. Safe to call more than once.
pub fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}
