//! Document-store abstraction and its in-memory and SQLite implementations.

mod indices;
/// In-memory store with a lagging secondary index.
pub mod memory;
/// SQLite-backed store.
pub mod sqlite;

use crate::{
    message::FailedMessage,
    record::{BatchRecord, OperationRecord, Versioned},
    types::{MessageId, MessageStatus},
    uow::UnitOfWork,
};

/// Errors surfaced by a [`DocumentStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An optimistic-concurrency check failed.
    #[error("concurrency conflict on {document_id}")]
    Conflict {
        /// Document whose version did not match.
        document_id: String,
    },
    /// SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Payload encoding or decoding failure.
    #[error("serde: {0}")]
    Serde(#[from] serde_json::Error),
    /// The store cannot serve requests right now.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// Any other store failure.
    #[error("{0}")]
    Message(String),
}

impl StoreError {
    /// True for optimistic-concurrency conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result alias for store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Index entry for one group under one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupView {
    /// Group identifier.
    pub id: String,
    /// Group title.
    pub title: String,
    /// Number of indexed messages.
    pub count: usize,
}

/// Transactional document store with a possibly stale secondary index.
///
/// Index reads (`group_view`, `page_group_message_ids`) may lag behind
/// commits. Document loads and commits are always consistent. Versions of
/// operation records start at 1 and increase by exactly one per write.
pub trait DocumentStore: Send + Sync {
    /// Index entry for messages of `group_id` currently in `status`.
    fn group_view(&self, group_id: &str, status: MessageStatus) -> StoreResult<Option<GroupView>>;

    /// Up to `limit` indexed message ids strictly after `after`, ascending.
    fn page_group_message_ids(
        &self,
        group_id: &str,
        status: MessageStatus,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<MessageId>>;

    /// Loads one failed-message document.
    fn load_message(&self, id: &str) -> StoreResult<Option<FailedMessage>>;

    /// Loads one operation record with its version.
    fn load_operation(&self, id: &str) -> StoreResult<Option<Versioned<OperationRecord>>>;

    /// Loads every operation record.
    fn list_operations(&self) -> StoreResult<Vec<Versioned<OperationRecord>>>;

    /// Loads one batch record.
    fn load_batch(&self, id: &str) -> StoreResult<Option<BatchRecord>>;

    /// Commits every staged command or none of them.
    fn commit(&self, uow: UnitOfWork) -> StoreResult<()>;
}
