use std::collections::BTreeSet;

use hashbrown::HashMap;

use crate::types::{GroupId, MessageId, MessageStatus};

pub type GroupIndexKey = (GroupId, MessageStatus);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexedGroup {
    pub title: String,
    pub ids: BTreeSet<MessageId>,
}

pub type GroupIndex = HashMap<GroupIndexKey, IndexedGroup>;
