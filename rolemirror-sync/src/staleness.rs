//! Stale-entry detection: cached members no longer listed by the source.

use std::collections::HashSet;

use rolemirror_core::{GroupId, MemberId};

use crate::cache::RoleCache;

/// `cache.keys_for_group(group) \ observed`, sorted.
///
/// Must be called after every sync for the group has settled, otherwise a
/// member whose first write is still in flight is missed rather than pruned.
pub fn stale_members(
    cache: &RoleCache,
    group: &GroupId,
    observed: &HashSet<MemberId>,
) -> Vec<MemberId> {
    let mut stale: Vec<MemberId> = cache
        .keys_for_group(group)
        .into_iter()
        .filter(|member| !observed.contains(member))
        .collect();
    stale.sort();
    stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use rolemirror_core::{RoleRecord, RoleSet};

    fn cache_with(group: &str, members: &[&str]) -> RoleCache {
        let rows = members.iter().map(|m| {
            RoleRecord::new(GroupId::from(group), MemberId::from(*m), RoleSet::new())
        });
        RoleCache::load(rows, &[GroupId::from(group)])
    }

    fn ids(members: &[&str]) -> HashSet<MemberId> {
        members.iter().copied().map(MemberId::from).collect()
    }

    #[test]
    fn only_missing_members_are_stale() {
        let cache = cache_with("g", &["1", "2", "3"]);
        let stale = stale_members(&cache, &GroupId::from("g"), &ids(&["1", "3"]));
        assert_eq!(stale, vec![MemberId::from("2")]);
    }

    #[test]
    fn loaded_rows_against_same_ids_have_no_stale() {
        let cache = cache_with("g", &["a", "b", "c"]);
        let stale = stale_members(&cache, &GroupId::from("g"), &ids(&["a", "b", "c"]));
        assert!(stale.is_empty());
    }

    #[test]
    fn empty_listing_makes_everything_stale() {
        let cache = cache_with("g", &["1", "2", "3", "4", "5"]);
        let stale = stale_members(&cache, &GroupId::from("g"), &HashSet::new());
        assert_eq!(stale.len(), 5);
    }
}
