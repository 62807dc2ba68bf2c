//! Group reads against the (possibly stale) secondary index.

use std::collections::VecDeque;

use crate::{
    store::{DocumentStore, StoreResult},
    types::{MessageId, MessageStatus, UNDEFINED_GROUP_NAME},
};

/// Count and title of a group as the index currently sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDetails {
    /// Indexed messages in the requested status.
    pub message_count: usize,
    /// Group title, or `"Undefined"` when the group is not indexed.
    pub group_name: String,
}

/// Reads the group entry for `status`. A missing entry is a zero count, not an error.
pub fn group_details(
    store: &dyn DocumentStore,
    group_id: &str,
    status: MessageStatus,
) -> StoreResult<GroupDetails> {
    Ok(match store.group_view(group_id, status)? {
        Some(view) => GroupDetails {
            message_count: view.count,
            group_name: view.title,
        },
        None => GroupDetails {
            message_count: 0,
            group_name: UNDEFINED_GROUP_NAME.to_string(),
        },
    })
}

/// Lazy keyset-paged iterator over a group's indexed message ids.
///
/// Holds at most one page in memory. Yields ids in ascending order; the
/// sequence can be restarted by building a new stream.
pub struct IdStream<'a> {
    store: &'a dyn DocumentStore,
    group_id: &'a str,
    status: MessageStatus,
    page_size: usize,
    last: Option<MessageId>,
    page: VecDeque<MessageId>,
    exhausted: bool,
}

impl<'a> IdStream<'a> {
    /// Streams ids of `group_id` in `status`, `page_size` per index query.
    pub fn new(
        store: &'a dyn DocumentStore,
        group_id: &'a str,
        status: MessageStatus,
        page_size: usize,
    ) -> Self {
        Self {
            store,
            group_id,
            status,
            page_size: page_size.max(1),
            last: None,
            page: VecDeque::new(),
            exhausted: false,
        }
    }

    fn fill(&mut self) -> StoreResult<()> {
        let page = self.store.page_group_message_ids(
            self.group_id,
            self.status,
            self.last.as_deref(),
            self.page_size,
        )?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.last = Some(last.clone());
        }
        self.page.extend(page);
        Ok(())
    }
}

impl Iterator for IdStream<'_> {
    type Item = StoreResult<MessageId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() && !self.exhausted {
            if let Err(err) = self.fill() {
                self.exhausted = true;
                return Some(Err(err));
            }
        }
        self.page.pop_front().map(Ok)
    }
}
