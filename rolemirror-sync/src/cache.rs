//! In-memory mirror of the last role set confirmed by the sink.
//!
//! The cache is write-through: only [`crate::sink::SinkAdapter`] mutates it,
//! and only after the sink has accepted the write. It is seeded once from the
//! sink, filtered to the configured groups, and lives for the whole process.

use std::collections::HashSet;

use dashmap::DashMap;

use rolemirror_core::{GroupId, MemberId, RoleKey, RoleRecord, RoleSet};

/// Concurrent `(group, member) -> roles` map.
#[derive(Debug, Default)]
pub struct RoleCache {
    entries: DashMap<RoleKey, RoleSet>,
}

impl RoleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from persisted rows, keeping only rows of `groups`.
    ///
    /// This is the only bulk entry point; rows for groups that are not
    /// configured are dropped here and never reach the map.
    pub fn load<I>(rows: I, groups: &[GroupId]) -> Self
    where
        I: IntoIterator<Item = RoleRecord>,
    {
        let allowed: HashSet<&GroupId> = groups.iter().collect();
        let cache = Self::new();
        for row in rows {
            if !allowed.contains(&row.group_id) {
                continue;
            }
            cache
                .entries
                .insert(RoleKey::new(row.group_id, row.member_id), row.roles);
        }
        cache
    }

    pub fn get(&self, group: &GroupId, member: &MemberId) -> Option<RoleSet> {
        self.entries
            .get(&RoleKey::new(group.clone(), member.clone()))
            .map(|entry| entry.value().clone())
    }

    pub fn set(&self, group: &GroupId, member: &MemberId, roles: RoleSet) {
        self.entries
            .insert(RoleKey::new(group.clone(), member.clone()), roles);
    }

    pub fn delete(&self, group: &GroupId, member: &MemberId) {
        self.entries
            .remove(&RoleKey::new(group.clone(), member.clone()));
    }

    /// Members with a cached record in `group`, in no particular order.
    pub fn keys_for_group(&self, group: &GroupId) -> Vec<MemberId> {
        self.entries
            .iter()
            .filter(|entry| &entry.key().group == group)
            .map(|entry| entry.key().member.clone())
            .collect()
    }

    pub fn group_len(&self, group: &GroupId) -> usize {
        self.entries
            .iter()
            .filter(|entry| &entry.key().group == group)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All cached records, sorted by key.
    pub fn snapshot(&self) -> Vec<RoleRecord> {
        let mut rows: Vec<RoleRecord> = self
            .entries
            .iter()
            .map(|entry| {
                RoleRecord::new(
                    entry.key().group.clone(),
                    entry.key().member.clone(),
                    entry.value().clone(),
                )
            })
            .collect();
        rows.sort_by(|a, b| {
            (&a.group_id, &a.member_id).cmp(&(&b.group_id, &b.member_id))
        });
        rows
    }
}
