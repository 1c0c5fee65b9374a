pub mod daemon;
pub mod notify;
pub mod run;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use rolemirror_core::config::{self, ENV_STATE_DIR};

/// Where to find the daemon socket.
#[derive(Args, Debug, Default)]
pub struct StateDirArgs {
    /// State directory holding the daemon socket.
    #[arg(long, conflicts_with = "config")]
    pub state_dir: Option<PathBuf>,

    /// Read the state directory from this config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl StateDirArgs {
    /// `--state-dir`, then `--config`, then `ROLEMIRROR_STATE_DIR`, then
    /// `~/.rolemirror`.
    pub fn resolve(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.state_dir {
            return Ok(dir.clone());
        }
        let home = dirs::home_dir().context("could not determine home directory")?;
        if let Some(path) = &self.config {
            let config = config::load_at(&home, Some(path))
                .with_context(|| format!("failed to load config {}", path.display()))?;
            return Ok(config.state_dir_or(&home));
        }
        if let Some(dir) = std::env::var_os(ENV_STATE_DIR).filter(|d| !d.is_empty()) {
            return Ok(PathBuf::from(dir));
        }
        Ok(config::rolemirror_root(&home))
    }
}
