//! Routes live membership notifications into the [`SinkAdapter`].
//!
//! Both handlers are fire-and-forget for the transport: failures are logged
//! here and never returned.

use std::collections::HashSet;
use std::sync::Arc;

use rolemirror_core::{GroupId, MemberId, RoleSet};

use crate::sink::{SinkAdapter, SyncOutcome};

/// What the dispatcher did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Applied,
    Unchanged,
    /// Group not configured or member id empty.
    Ignored,
    /// The sink rejected the write; already logged.
    Failed,
}

#[derive(Clone)]
pub struct EventDispatcher {
    adapter: SinkAdapter,
    groups: Arc<HashSet<GroupId>>,
}

impl EventDispatcher {
    pub fn new(adapter: SinkAdapter, groups: &[GroupId]) -> Self {
        Self {
            adapter,
            groups: Arc::new(groups.iter().cloned().collect()),
        }
    }

    fn accepts(&self, group: &GroupId, member: &MemberId) -> bool {
        if member.is_empty() {
            tracing::debug!(group = %group, "ignoring notification without member id");
            return false;
        }
        if !self.groups.contains(group) {
            tracing::debug!(
                group = %group,
                member = %member,
                "ignoring notification for unconfigured group",
            );
            return false;
        }
        true
    }

    pub async fn on_member_changed(
        &self,
        group: &GroupId,
        member: &MemberId,
        roles: RoleSet,
    ) -> Dispatched {
        if !self.accepts(group, member) {
            return Dispatched::Ignored;
        }
        match self.adapter.sync_member(group, member, roles).await {
            Ok(SyncOutcome::Written | SyncOutcome::WouldWrite) => Dispatched::Applied,
            Ok(SyncOutcome::Unchanged) => Dispatched::Unchanged,
            Err(err) => {
                tracing::error!(
                    group = %group,
                    member = %member,
                    error = %err,
                    "member change not persisted",
                );
                Dispatched::Failed
            }
        }
    }

    pub async fn on_member_removed(&self, group: &GroupId, member: &MemberId) -> Dispatched {
        if !self.accepts(group, member) {
            return Dispatched::Ignored;
        }
        match self.adapter.remove_member(group, member).await {
            Ok(_) => Dispatched::Applied,
            Err(err) => {
                tracing::error!(
                    group = %group,
                    member = %member,
                    error = %err,
                    "member removal not persisted",
                );
                Dispatched::Failed
            }
        }
    }
}
