//! `rolemirror run`: batch pass or continuous daemon.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use rolemirror_core::{config, RunMode};
use rolemirror_daemon::{init_tracing, run_batch, start_blocking};
use rolemirror_sync::{GroupReport, GroupState};

/// Arguments for `rolemirror run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Config file (default `~/.rolemirror/config.yaml`).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the configured run mode.
    #[arg(long, value_name = "batch|continuous")]
    pub mode: Option<RunMode>,

    /// Compute changes without writing to the store.
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the batch reports as JSON.
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let mut config =
            config::load(self.config.as_deref()).context("failed to load configuration")?;
        if let Some(mode) = self.mode {
            config.mode = mode;
        }

        match config.mode {
            RunMode::Batch => {
                init_tracing(config.log_format);
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()
                    .context("failed to start async runtime")?;
                let reports = runtime
                    .block_on(run_batch(&config, self.dry_run))
                    .context("batch reconcile failed")?;

                if self.json {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&reports)
                            .context("failed to serialize reports")?
                    );
                } else {
                    print_reports(&reports, self.dry_run);
                }
                // Per-group failures are reported, not fatal.
                Ok(())
            }
            RunMode::Continuous => {
                if self.dry_run {
                    bail!("--dry-run is only supported in batch mode");
                }
                start_blocking(config).context("daemon exited with error")
            }
        }
    }
}

#[derive(Tabled)]
struct ReportRow {
    #[tabled(rename = "group")]
    group: String,
    #[tabled(rename = "state")]
    state: String,
    #[tabled(rename = "fetched")]
    fetched: usize,
    #[tabled(rename = "written")]
    written: usize,
    #[tabled(rename = "unchanged")]
    unchanged: usize,
    #[tabled(rename = "pruned")]
    pruned: usize,
    #[tabled(rename = "failures")]
    failures: usize,
    #[tabled(rename = "time")]
    time: String,
}

fn print_reports(reports: &[GroupReport], dry_run: bool) {
    let prefix = if dry_run { "[dry-run] " } else { "" };
    if reports.is_empty() {
        println!("{prefix}No groups configured.");
        return;
    }

    let rows: Vec<ReportRow> = reports
        .iter()
        .map(|report| ReportRow {
            group: report.group.to_string(),
            state: state_label(report.state),
            fetched: report.fetched,
            written: report.written,
            unchanged: report.unchanged,
            pruned: report.pruned,
            failures: report.sync_failures + report.prune_failures,
            time: format!("{}ms", report.duration_ms),
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{prefix}reconciled {} group(s)", reports.len());
    println!("{table}");

    for report in reports {
        if let Some(error) = &report.error {
            println!("  {} {}: {error}", "✗".red().bold(), report.group);
        }
    }
}

fn state_label(state: GroupState) -> String {
    match state {
        GroupState::Done => "DONE".green().bold().to_string(),
        GroupState::Failed => "FAILED".red().bold().to_string(),
        other => format!("{other:?}").to_uppercase().yellow().to_string(),
    }
}
