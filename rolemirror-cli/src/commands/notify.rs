//! `rolemirror notify`: push a member change into the daemon's dispatcher.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use rolemirror_daemon::{notify_member_changed, notify_member_removed};

use super::StateDirArgs;

#[derive(Subcommand, Debug)]
pub enum NotifyCommand {
    /// A member's roles changed (or the member joined).
    Changed(ChangedArgs),
    /// A member left the group.
    Removed(RemovedArgs),
}

#[derive(Args, Debug)]
pub struct ChangedArgs {
    pub group: String,
    pub member: String,

    /// Role the member now holds; repeat for several. None means no roles.
    #[arg(long = "role", value_name = "ROLE")]
    pub roles: Vec<String>,

    #[command(flatten)]
    pub target: StateDirArgs,
}

#[derive(Args, Debug)]
pub struct RemovedArgs {
    pub group: String,
    pub member: String,

    #[command(flatten)]
    pub target: StateDirArgs,
}

pub fn run(command: NotifyCommand) -> Result<()> {
    match command {
        NotifyCommand::Changed(args) => {
            let state_dir = args.target.resolve()?;
            notify_member_changed(&state_dir, args.group, args.member, args.roles)
                .context("failed to notify daemon")?;
        }
        NotifyCommand::Removed(args) => {
            let state_dir = args.target.resolve()?;
            notify_member_removed(&state_dir, args.group, args.member)
                .context("failed to notify daemon")?;
        }
    }
    println!("notification accepted");
    Ok(())
}
