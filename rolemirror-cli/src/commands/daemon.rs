//! Commands that talk to a running `rolemirror run --mode continuous`.

use anyhow::{Context, Result};
use clap::Args;
use serde_json::Value;

use rolemirror_daemon::paths::socket_path;
use rolemirror_daemon::{request_reconcile, request_status, request_stop, DaemonError};

use super::StateDirArgs;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Group to reconcile; every configured group when omitted.
    pub group: Option<String>,

    #[command(flatten)]
    pub target: StateDirArgs,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: StateDirArgs,
}

#[derive(Args, Debug)]
pub struct StopArgs {
    #[command(flatten)]
    pub target: StateDirArgs,
}

impl ReconcileArgs {
    pub fn run(self) -> Result<()> {
        let state_dir = self.target.resolve()?;
        let reports =
            request_reconcile(&state_dir, self.group).context("daemon reconcile failed")?;
        print_json(&reports)
    }
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let state_dir = self.target.resolve()?;
        match request_status(&state_dir) {
            Ok(status) => print_json(&status),
            Err(DaemonError::DaemonNotRunning { .. }) => print_json(&serde_json::json!({
                "running": false,
                "socket": socket_path(&state_dir).display().to_string(),
            })),
            Err(err) => Err(err).context("failed to query daemon status"),
        }
    }
}

impl StopArgs {
    pub fn run(self) -> Result<()> {
        let state_dir = self.target.resolve()?;
        match request_stop(&state_dir) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => println!("daemon is not running"),
            Err(err) => return Err(err).context("failed to stop daemon"),
        }
        Ok(())
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon response JSON")?
    );
    Ok(())
}
