//! Unit-of-work command model committed atomically by a document store.

use crate::{
    message::{FailedMessage, MessagePatch},
    record::{BatchRecord, OperationRecord},
    types::{MessageId, Version},
};

/// One staged write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Upsert a failed-message document.
    PutMessage {
        /// Document to store.
        message: FailedMessage,
    },
    /// Apply one patch to every listed message. Unknown ids are skipped.
    PatchMessages {
        /// Target documents.
        ids: Vec<MessageId>,
        /// Patch applied to each.
        patch: MessagePatch,
    },
    /// Write an operation record under a version check.
    PutOperation {
        /// Record to store.
        record: OperationRecord,
        /// `None` requires the record to be absent, `Some(v)` requires version `v`.
        expected_version: Option<Version>,
    },
    /// Delete an operation record under a version check.
    DeleteOperation {
        /// Record id.
        id: String,
        /// Version the caller last read.
        expected_version: Version,
    },
    /// Write a batch record.
    PutBatch {
        /// Batch to store.
        batch: BatchRecord,
    },
    /// Delete a batch record; absent ids are ignored.
    DeleteBatch {
        /// Batch id.
        id: String,
    },
}

/// Ordered set of commands that commit all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitOfWork {
    commands: Vec<Command>,
}

impl UnitOfWork {
    /// Creates an empty unit of work.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command.
    pub fn stage(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Staged commands in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consumes the unit of work.
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    /// Returns true when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of staged commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }
}
