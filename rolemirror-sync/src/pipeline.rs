//! Shared reconciliation entrypoint used by the CLI and the daemon.

use std::sync::Arc;

use rolemirror_core::{Config, GroupId};

use crate::cache::RoleCache;
use crate::dispatcher::EventDispatcher;
use crate::error::PipelineError;
use crate::pager::Pager;
use crate::reconciler::{GroupReport, Reconciler};
use crate::sink::SinkAdapter;
use crate::store::{MemberSource, RoleStore};

/// Scope for a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileScope {
    /// Every configured group, in configuration order.
    All,
    /// A single configured group.
    Group(GroupId),
}

/// Engine components wired around one shared [`RoleCache`].
#[derive(Clone)]
pub struct Pipeline {
    groups: Vec<GroupId>,
    cache: Arc<RoleCache>,
    reconciler: Reconciler,
    dispatcher: EventDispatcher,
}

impl Pipeline {
    /// Load every persisted row for the configured groups and seed the cache.
    pub async fn bootstrap(
        config: &Config,
        store: Arc<dyn RoleStore>,
        source: Arc<dyn MemberSource>,
        dry_run: bool,
    ) -> Result<Self, PipelineError> {
        let rows = store.load_all(&config.groups).await?;
        let cache = Arc::new(RoleCache::load(rows, &config.groups));
        tracing::info!(
            groups = config.groups.len(),
            cached = cache.len(),
            dry_run,
            "role cache loaded",
        );

        let adapter = SinkAdapter::new(store, cache.clone()).with_dry_run(dry_run);
        let pager = Pager::new(source, config.page_size);
        let reconciler = Reconciler::new(pager, adapter.clone(), config.sync_concurrency);
        let dispatcher = EventDispatcher::new(adapter, &config.groups);

        Ok(Self {
            groups: config.groups.clone(),
            cache,
            reconciler,
            dispatcher,
        })
    }

    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    pub fn cache(&self) -> &Arc<RoleCache> {
        &self.cache
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Run one reconciliation pass for `scope`.
    pub async fn run(&self, scope: ReconcileScope) -> Result<Vec<GroupReport>, PipelineError> {
        match scope {
            ReconcileScope::All => Ok(self.reconciler.reconcile_all(&self.groups).await),
            ReconcileScope::Group(group) => {
                if !self.groups.contains(&group) {
                    return Err(PipelineError::UnknownGroup(group));
                }
                Ok(vec![self.reconciler.reconcile_group(&group).await])
            }
        }
    }
}
