//! Continuous-mode runtime: reconcile queue, scheduler and notification socket.

mod bootstrap;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;

pub use bootstrap::{init_tracing, open_pipeline, run_batch};
pub use error::DaemonError;
pub use protocol::{
    notify_member_changed, notify_member_removed, request_reconcile, request_status,
    request_stop, send_request, DaemonRequest, DaemonResponse,
};
pub use runtime::{run, run_with, start_blocking, ReportLog, RuntimeOptions};
