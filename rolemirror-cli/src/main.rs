//! rolemirror: mirror group role membership into a local store.
//!
//! # Usage
//!
//! ```text
//! rolemirror run [--config PATH] [--mode batch|continuous] [--dry-run] [--json]
//! rolemirror reconcile [GROUP]
//! rolemirror status
//! rolemirror stop
//! rolemirror notify changed <group> <member> [--role R]...
//! rolemirror notify removed <group> <member>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::{ReconcileArgs, StatusArgs, StopArgs},
    notify::NotifyCommand,
    run::RunArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "rolemirror",
    version,
    about = "Keep a local store of group member roles in sync with the source",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile every configured group, then exit or keep serving notifications.
    Run(RunArgs),

    /// Ask the running daemon to reconcile one group or all of them.
    Reconcile(ReconcileArgs),

    /// Query the running daemon.
    Status(StatusArgs),

    /// Request graceful daemon shutdown.
    Stop(StopArgs),

    /// Forward a member change to the running daemon.
    Notify {
        #[command(subcommand)]
        command: NotifyCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Reconcile(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Stop(args) => args.run(),
        Commands::Notify { command } => commands::notify::run(command),
    }
}
