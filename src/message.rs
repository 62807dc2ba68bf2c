//! Failed-message document, failure-group membership, and status patch types.

use serde::{Deserialize, Serialize};

use crate::types::{FAILED_MESSAGE_PREFIX, GroupId, MessageId, MessageStatus};

/// Membership of a message in one failure group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureGroupRef {
    /// Group identifier.
    pub id: GroupId,
    /// Human-readable group title.
    pub title: String,
    /// Classifier that produced the group (exception type, endpoint, ...).
    pub group_type: String,
}

/// Failed-message document as held by message storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedMessage {
    /// Storage id, `FailedMessages/{unique id}`.
    pub id: MessageId,
    /// Current lifecycle status.
    pub status: MessageStatus,
    /// Groups the message was classified into.
    pub failure_groups: Vec<FailureGroupRef>,
    /// Logical message type name.
    pub message_type: String,
    /// Exception text of the last processing attempt.
    pub exception_message: String,
    /// Time of the last failure in milliseconds since epoch.
    pub time_of_failure_ms: u64,
}

impl FailedMessage {
    /// Builds the storage id for a unique message id.
    pub fn make_id(unique_id: &str) -> MessageId {
        format!("{FAILED_MESSAGE_PREFIX}{unique_id}")
    }

    /// True when the message belongs to `group_id`.
    pub fn in_group(&self, group_id: &str) -> bool {
        self.failure_groups.iter().any(|g| g.id == group_id)
    }
}

/// Strips the storage prefix from a message id, for external subscribers.
pub fn strip_storage_prefix(id: &str) -> &str {
    id.strip_prefix(FAILED_MESSAGE_PREFIX).unwrap_or(id)
}

/// Sparse patch where each `Some` field overwrites the document value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessagePatch {
    /// Optional replacement for the status.
    pub status: Option<MessageStatus>,
}

impl MessagePatch {
    /// Patch that sets the status field only.
    pub fn set_status(status: MessageStatus) -> Self {
        Self {
            status: Some(status),
        }
    }

    /// Returns true when no fields are set.
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Applies this patch in place to `msg`.
    pub fn apply_to(&self, msg: &mut FailedMessage) {
        if let Some(v) = self.status {
            msg.status = v;
        }
    }
}
