//! Sink adapter: the only mutation path into [`RoleCache`].
//!
//! ## `sync_member` protocol
//!
//! 1. Look up the cached role set.
//! 2. Compare with the observed set → return `Unchanged` if identical.
//! 3. Upsert `(group, member, observed)` to the store.
//! 4. On success, record `observed` in the cache.
//!
//! The store call always settles before the cache is touched; a failed write
//! leaves the cache at the last confirmed state so the next pass re-attempts
//! it. Nothing is retried here.
//!
//! Steps 1-4 (and the delete + evict pair) run under a per-key lock, so two
//! callers touching the same `(group, member)` take turns in arrival order and
//! the cache always ends on the state the store last accepted.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use rolemirror_core::{GroupId, MemberId, RoleKey, RoleRecord, RoleSet};

use crate::cache::RoleCache;
use crate::comparator::has_changed;
use crate::error::StoreError;
use crate::store::RoleStore;

/// Outcome of syncing one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Roles changed and the row was written.
    Written,
    /// Observed roles match the cache; no I/O.
    Unchanged,
    /// Dry-run: the row *would* have been written.
    WouldWrite,
}

/// Outcome of removing one member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    /// Dry-run: the row *would* have been deleted.
    WouldRemove,
}

/// One async mutex per key currently being written.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: DashMap<RoleKey, Arc<Mutex<()>>>,
}

impl KeyLocks {
    async fn acquire(&self, key: &RoleKey) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(key.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Drop the entry once nobody holds or waits on it. Waiters clone the
    /// `Arc` under the shard lock, so a count of one means only the map is left.
    fn release(&self, key: &RoleKey, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.locks
            .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Wraps a [`RoleStore`] with cache-update side effects.
#[derive(Clone)]
pub struct SinkAdapter {
    store: Arc<dyn RoleStore>,
    cache: Arc<RoleCache>,
    locks: Arc<KeyLocks>,
    dry_run: bool,
}

impl SinkAdapter {
    pub fn new(store: Arc<dyn RoleStore>, cache: Arc<RoleCache>) -> Self {
        Self {
            store,
            cache,
            locks: Arc::new(KeyLocks::default()),
            dry_run: false,
        }
    }

    /// Report what would change without writing to the store or the cache.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn cache(&self) -> &Arc<RoleCache> {
        &self.cache
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Keys with a write in flight or queued.
    pub fn keys_in_flight(&self) -> usize {
        self.locks.len()
    }

    pub async fn sync_member(
        &self,
        group: &GroupId,
        member: &MemberId,
        observed: RoleSet,
    ) -> Result<SyncOutcome, StoreError> {
        let key = RoleKey::new(group.clone(), member.clone());
        let guard = self.locks.acquire(&key).await;
        let result = self.sync_locked(group, member, observed).await;
        self.locks.release(&key, guard);
        result
    }

    async fn sync_locked(
        &self,
        group: &GroupId,
        member: &MemberId,
        observed: RoleSet,
    ) -> Result<SyncOutcome, StoreError> {
        let cached = self.cache.get(group, member);
        if !has_changed(cached.as_ref(), &observed) {
            tracing::trace!(group = %group, member = %member, "roles unchanged");
            return Ok(SyncOutcome::Unchanged);
        }

        if self.dry_run {
            tracing::info!(group = %group, member = %member, "[dry-run] would write roles");
            return Ok(SyncOutcome::WouldWrite);
        }

        let record = RoleRecord::new(group.clone(), member.clone(), observed);
        self.store.upsert(&record).await?;
        tracing::debug!(
            group = %group,
            member = %member,
            roles = record.roles.len(),
            "wrote roles",
        );
        self.cache.set(group, member, record.roles);
        Ok(SyncOutcome::Written)
    }

    pub async fn remove_member(
        &self,
        group: &GroupId,
        member: &MemberId,
    ) -> Result<RemoveOutcome, StoreError> {
        if self.dry_run {
            tracing::info!(group = %group, member = %member, "[dry-run] would remove member");
            return Ok(RemoveOutcome::WouldRemove);
        }

        let key = RoleKey::new(group.clone(), member.clone());
        let guard = self.locks.acquire(&key).await;
        let result = self.store.delete(group, member).await;
        if result.is_ok() {
            self.cache.delete(group, member);
            tracing::debug!(group = %group, member = %member, "removed member");
        }
        self.locks.release(&key, guard);
        result.map(|()| RemoveOutcome::Removed)
    }
}
