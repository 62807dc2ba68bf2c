//! Durable operation-progress and batch documents.

use serde::{Deserialize, Serialize};

use crate::types::{ArchiveType, GroupId, MessageId, OperationKind, Version};

/// Version number for serialized [`RecordEnvelope`] payloads.
pub const RECORD_FORMAT_VERSION: u16 = 1;

/// Durable progress of one archive or unarchive run over a group.
///
/// At most one record exists per `(kind, request_id, archive_type)`. Its
/// presence means the operation is in flight and resumable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Deterministic document id, see [`OperationRecord::make_id`].
    pub id: String,
    /// Group id the operation targets.
    pub request_id: GroupId,
    /// Archive or unarchive.
    pub kind: OperationKind,
    /// Classifier of `request_id`.
    pub archive_type: ArchiveType,
    /// Message count read from the index at planning time.
    pub total_message_count: usize,
    /// Messages patched so far.
    pub processed_count: usize,
    /// Planning time in milliseconds since epoch.
    pub started_at_ms: u64,
    /// Group title read from the index at planning time.
    pub group_name: String,
    /// Number of batch slots planned.
    pub total_batches: usize,
    /// Next batch slot to execute.
    pub current_batch: usize,
}

impl OperationRecord {
    /// Builds the document id for an operation key.
    pub fn make_id(kind: OperationKind, group_id: &str, archive_type: ArchiveType) -> String {
        format!("{}/{group_id}/{archive_type}", kind.collection())
    }

    /// Id of the batch document for `batch_index`.
    pub fn batch_id(&self, batch_index: usize) -> String {
        BatchRecord::make_id(&self.id, batch_index)
    }

    /// True once every planned batch slot has been consumed.
    pub fn is_drained(&self) -> bool {
        self.current_batch >= self.total_batches
    }
}

/// One planned batch of message ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRecord {
    /// Deterministic document id, see [`BatchRecord::make_id`].
    pub id: String,
    /// Owning operation record id.
    pub operation_id: String,
    /// Slot within the operation.
    pub batch_index: usize,
    /// Message ids to patch, in index order.
    pub message_ids: Vec<MessageId>,
}

impl BatchRecord {
    /// Builds the document id for a batch slot.
    pub fn make_id(operation_id: &str, batch_index: usize) -> String {
        format!("{operation_id}/{batch_index}")
    }
}

/// A loaded document and the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    /// Document body.
    pub value: T,
    /// Version the document was read at. Starts at 1.
    pub version: Version,
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEnvelope<T> {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped record.
    pub record: T,
}

impl<T> RecordEnvelope<T> {
    /// Constructs an envelope using [`RECORD_FORMAT_VERSION`].
    pub fn new(record: T) -> Self {
        Self {
            format_version: RECORD_FORMAT_VERSION,
            record,
        }
    }
}
