//! Change detection between the cached and the observed role set.

use rolemirror_core::RoleSet;

/// Whether `observed` must be written to the sink.
///
/// A member never seen before is always a change, even with no roles: first
/// sight must create a row. Otherwise the sets differ iff their symmetric
/// difference is non-empty.
pub fn has_changed(cached: Option<&RoleSet>, observed: &RoleSet) -> bool {
    match cached {
        None => true,
        Some(cached) => cached.symmetric_difference(observed).next().is_some(),
    }
}
