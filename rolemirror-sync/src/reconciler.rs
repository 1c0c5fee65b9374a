//! Per-group reconciliation pass: fetch, sync, prune.
//!
//! ```text
//! Fetching ──ok──▶ Syncing ──join──▶ Pruning ──▶ Done
//!    │
//!    └──err──▶ Failed
//! ```
//!
//! Member syncs fan out with bounded concurrency and each result is collected
//! on its own, so one failing member never cancels its siblings. Pruning starts
//! only once every sync has settled.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use rolemirror_core::{GroupId, MemberId, MemberRoleObservation, RoleKey};

use crate::error::ReconcileError;
use crate::pager::Pager;
use crate::sink::{RemoveOutcome, SinkAdapter, SyncOutcome};
use crate::staleness::stale_members;

/// Phase of a group's reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupState {
    Fetching,
    Syncing,
    Pruning,
    Done,
    Failed,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
    pub group: GroupId,
    pub state: GroupState,
    pub fetched: usize,
    pub written: usize,
    pub unchanged: usize,
    pub sync_failures: usize,
    pub pruned: usize,
    pub prune_failures: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u128,
}

impl GroupReport {
    fn begin(group: &GroupId) -> Self {
        Self {
            group: group.clone(),
            state: GroupState::Fetching,
            fetched: 0,
            written: 0,
            unchanged: 0,
            sync_failures: 0,
            pruned: 0,
            prune_failures: 0,
            error: None,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == GroupState::Done
    }

    fn finish(mut self, state: GroupState, elapsed: Duration) -> Self {
        self.state = state;
        self.duration_ms = elapsed.as_millis();
        self
    }
}

/// Orchestrates [`Pager`] and [`SinkAdapter`] for each group.
#[derive(Clone)]
pub struct Reconciler {
    pager: Pager,
    adapter: SinkAdapter,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(pager: Pager, adapter: SinkAdapter, concurrency: usize) -> Self {
        Self {
            pager,
            adapter,
            concurrency: concurrency.max(1),
        }
    }

    /// Reconcile `groups` one after another.
    ///
    /// A failed group is reported and skipped; it never stops the others.
    pub async fn reconcile_all(&self, groups: &[GroupId]) -> Vec<GroupReport> {
        let mut reports = Vec::with_capacity(groups.len());
        for group in groups {
            reports.push(self.reconcile_group(group).await);
        }
        reports
    }

    pub async fn reconcile_group(&self, group: &GroupId) -> GroupReport {
        let started = Instant::now();
        let mut report = GroupReport::begin(group);
        tracing::debug!(group = %group, state = ?GroupState::Fetching, "reconcile phase");

        let members = match self.pager.fetch_all_members(group).await {
            Ok(members) => members,
            Err(source) => {
                let err = ReconcileError::Fetch {
                    group: group.clone(),
                    source,
                };
                tracing::error!(group = %group, error = %err, "reconcile failed");
                report.error = Some(err.to_string());
                return report.finish(GroupState::Failed, started.elapsed());
            }
        };
        report.fetched = members.len();

        tracing::debug!(
            group = %group,
            state = ?GroupState::Syncing,
            members = members.len(),
            "reconcile phase",
        );
        // A member listed twice is synced once, with its last observation.
        let mut latest: HashMap<MemberId, MemberRoleObservation> =
            HashMap::with_capacity(members.len());
        for member in members {
            if member.member_id.is_empty() {
                continue;
            }
            latest.insert(member.member_id.clone(), member);
        }
        let observed: HashSet<MemberId> = latest.keys().cloned().collect();
        let pending: Vec<MemberRoleObservation> = latest.into_values().collect();

        let adapter = &self.adapter;
        let outcomes: Vec<(MemberId, Result<SyncOutcome, _>)> = stream::iter(pending)
            .map(|member| async move {
                let result = adapter
                    .sync_member(&member.group_id, &member.member_id, member.roles)
                    .await;
                (member.member_id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (member, result) in outcomes {
            match result {
                Ok(SyncOutcome::Written | SyncOutcome::WouldWrite) => report.written += 1,
                Ok(SyncOutcome::Unchanged) => report.unchanged += 1,
                Err(source) => {
                    report.sync_failures += 1;
                    let err = ReconcileError::Sync {
                        key: RoleKey::new(group.clone(), member),
                        source,
                    };
                    tracing::warn!(group = %group, error = %err, "member sync failed");
                }
            }
        }

        tracing::debug!(group = %group, state = ?GroupState::Pruning, "reconcile phase");
        for member in stale_members(adapter.cache(), group, &observed) {
            match adapter.remove_member(group, &member).await {
                Ok(RemoveOutcome::Removed | RemoveOutcome::WouldRemove) => report.pruned += 1,
                Err(source) => {
                    report.prune_failures += 1;
                    let err = ReconcileError::Prune {
                        key: RoleKey::new(group.clone(), member),
                        source,
                    };
                    tracing::warn!(group = %group, error = %err, "stale member prune failed");
                }
            }
        }

        let report = report.finish(GroupState::Done, started.elapsed());
        tracing::info!(
            group = %group,
            fetched = report.fetched,
            written = report.written,
            unchanged = report.unchanged,
            sync_failures = report.sync_failures,
            pruned = report.pruned,
            prune_failures = report.prune_failures,
            duration_ms = report.duration_ms,
            "reconcile completed",
        );
        report
    }
}
