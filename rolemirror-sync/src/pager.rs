//! Cursor-driven walk over a group's member listing.

use std::sync::Arc;

use rolemirror_core::{GroupId, MemberId, MemberRoleObservation};

use crate::error::FetchError;
use crate::store::MemberSource;

/// Drives a [`MemberSource`] until the listing is exhausted.
#[derive(Clone)]
pub struct Pager {
    source: Arc<dyn MemberSource>,
    page_size: usize,
}

impl Pager {
    /// `page_size` must equal the source's maximum page size: a page shorter
    /// than it is read as the end of the listing.
    pub fn new(source: Arc<dyn MemberSource>, page_size: usize) -> Self {
        Self {
            source,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Every member of `group`, in listing order.
    ///
    /// Any page failure aborts the walk; partial results are discarded.
    pub async fn fetch_all_members(
        &self,
        group: &GroupId,
    ) -> Result<Vec<MemberRoleObservation>, FetchError> {
        let mut members = Vec::new();
        let mut cursor: Option<MemberId> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .source
                .fetch_page(group, cursor.as_ref(), self.page_size)
                .await?;
            pages += 1;

            let received = page.members.len();
            let next_cursor = page
                .members
                .iter()
                .rev()
                .find(|m| !m.member_id.is_empty())
                .map(|m| m.member_id.clone());
            members.extend(page.members);

            let exhausted = match page.has_more {
                Some(has_more) => !has_more,
                None => received < self.page_size,
            };
            if exhausted || received == 0 {
                break;
            }
            match next_cursor {
                Some(next) => cursor = Some(next),
                // A full page of anonymous members gives nothing to resume from.
                None => break,
            }
        }

        tracing::debug!(
            group = %group,
            pages,
            members = members.len(),
            "fetched member listing",
        );
        Ok(members)
    }
}
