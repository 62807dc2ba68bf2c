//! Shared primitive IDs and status enums.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque failure-group identifier.
pub type GroupId = String;
/// Storage id of a failed-message document.
pub type MessageId = String;
/// Document version used for optimistic concurrency.
pub type Version = u64;

/// Storage prefix carried by failed-message document ids.
pub const FAILED_MESSAGE_PREFIX: &str = "FailedMessages/";

/// Group name reported when the index has no entry for a group.
pub const UNDEFINED_GROUP_NAME: &str = "Undefined";

/// Lifecycle status of a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Failed and awaiting operator action.
    Unresolved,
    /// Reprocessed successfully.
    Resolved,
    /// A retry has been sent.
    RetryIssued,
    /// Hidden from the active failure list.
    Archived,
}

impl MessageStatus {
    /// Stable integer code used by the SQLite backend.
    pub fn code(self) -> i64 {
        match self {
            Self::Unresolved => 1,
            Self::Resolved => 2,
            Self::RetryIssued => 3,
            Self::Archived => 4,
        }
    }

    /// Inverse of [`MessageStatus::code`].
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Unresolved),
            2 => Some(Self::Resolved),
            3 => Some(Self::RetryIssued),
            4 => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Classifier the operation's request id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArchiveType {
    /// The request id is a failure-group id.
    FailureGroup,
}

impl fmt::Display for ArchiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FailureGroup => f.write_str("FailureGroup"),
        }
    }
}

/// Direction of a bulk status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OperationKind {
    /// `Unresolved` to `Archived`.
    Archive,
    /// `Archived` to `Unresolved`.
    Unarchive,
}

impl OperationKind {
    /// Status of the messages the operation picks up.
    pub fn source_status(self) -> MessageStatus {
        match self {
            Self::Archive => MessageStatus::Unresolved,
            Self::Unarchive => MessageStatus::Archived,
        }
    }

    /// Status the operation patches onto every message.
    pub fn target_status(self) -> MessageStatus {
        match self {
            Self::Archive => MessageStatus::Archived,
            Self::Unarchive => MessageStatus::Unresolved,
        }
    }

    /// Collection name used as the operation-record key prefix.
    pub fn collection(self) -> &'static str {
        match self {
            Self::Archive => "ArchiveOperations",
            Self::Unarchive => "UnarchiveOperations",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive => f.write_str("archive"),
            Self::Unarchive => f.write_str("unarchive"),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
