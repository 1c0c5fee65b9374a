//! Domain types for role mirroring.
//!
//! Identifiers are opaque strings issued by the source service. Role sets are
//! unordered: duplicates collapse and ordering never affects equality.

use std::collections::btree_set;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Separator used when rendering a [`RoleKey`] as `group:member`.
pub const KEY_SEPARATOR: char = ':';

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier of an independently synchronized group (a guild on the source).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub String);

impl GroupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for GroupId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for GroupId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a member within a group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Source payloads without a user decode to an empty id; those members are
    /// never synced.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for MemberId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MemberId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Composite `(group, member)` key. At most one record exists per key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RoleKey {
    pub group: GroupId,
    pub member: MemberId,
}

impl RoleKey {
    pub fn new(group: GroupId, member: MemberId) -> Self {
        Self { group, member }
    }
}

impl fmt::Display for RoleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.group, KEY_SEPARATOR, self.member)
    }
}

// ---------------------------------------------------------------------------
// RoleSet
// ---------------------------------------------------------------------------

/// Unordered set of role identifiers. Serialized as a sorted list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<String>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(role)
    }

    pub fn insert(&mut self, role: impl Into<String>) -> bool {
        self.0.insert(role.into())
    }

    pub fn iter(&self) -> btree_set::Iter<'_, String> {
        self.0.iter()
    }

    /// Roles present in exactly one of the two sets.
    pub fn symmetric_difference<'a>(
        &'a self,
        other: &'a RoleSet,
    ) -> btree_set::SymmetricDifference<'a, String> {
        self.0.symmetric_difference(&other.0)
    }
}

impl<S: Into<String>> FromIterator<S> for RoleSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for RoleSet {
    type Item = String;
    type IntoIter = btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a RoleSet {
    type Item = &'a String;
    type IntoIter = btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A persisted row: the roles one member holds in one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub group_id: GroupId,
    pub member_id: MemberId,
    #[serde(default)]
    pub roles: RoleSet,
}

impl RoleRecord {
    pub fn new(group_id: GroupId, member_id: MemberId, roles: RoleSet) -> Self {
        Self {
            group_id,
            member_id,
            roles,
        }
    }

    pub fn key(&self) -> RoleKey {
        RoleKey::new(self.group_id.clone(), self.member_id.clone())
    }
}

/// A role set seen on the source, either in a bulk page or a change
/// notification. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRoleObservation {
    pub group_id: GroupId,
    pub member_id: MemberId,
    pub roles: RoleSet,
}

impl MemberRoleObservation {
    pub fn new(group_id: GroupId, member_id: MemberId, roles: RoleSet) -> Self {
        Self {
            group_id,
            member_id,
            roles,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
