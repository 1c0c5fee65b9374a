//! Collaborator traits: the persistence sink and the bulk-read source.

use async_trait::async_trait;

use rolemirror_core::{GroupId, MemberId, MemberRoleObservation, RoleRecord};

use crate::error::{FetchError, StoreError};

/// Durable mirror of role records, keyed by `(group, member)`.
///
/// Implementations own the uniqueness constraint and serialize conflicting
/// writes to the same key.
#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Every persisted row belonging to one of `groups`.
    async fn load_all(&self, groups: &[GroupId]) -> Result<Vec<RoleRecord>, StoreError>;

    /// Insert or replace the row for `record.key()`.
    async fn upsert(&self, record: &RoleRecord) -> Result<(), StoreError>;

    /// Delete the row for `(group, member)`. Deleting a missing row succeeds.
    async fn delete(&self, group: &GroupId, member: &MemberId) -> Result<(), StoreError>;
}

/// One page of a group's member listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemberPage {
    pub members: Vec<MemberRoleObservation>,
    /// Explicit continuation signal when the source offers one. `None` means
    /// the caller falls back to the short-page rule.
    pub has_more: Option<bool>,
}

impl MemberPage {
    pub fn new(members: Vec<MemberRoleObservation>) -> Self {
        Self {
            members,
            has_more: None,
        }
    }
}

/// Paginated member listing of the group-membership service.
#[async_trait]
pub trait MemberSource: Send + Sync {
    /// Up to `limit` members of `group` whose id sorts after `after`.
    async fn fetch_page(
        &self,
        group: &GroupId,
        after: Option<&MemberId>,
        limit: usize,
    ) -> Result<MemberPage, FetchError>;
}
