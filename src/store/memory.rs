//! In-memory document store whose secondary index can lag behind commits.

use std::ops::Bound;
use std::sync::{Mutex, MutexGuard};

use hashbrown::HashMap;

use crate::{
    message::FailedMessage,
    record::{BatchRecord, OperationRecord, Versioned},
    types::{MessageId, MessageStatus, Version},
    uow::{Command, UnitOfWork},
};

use super::{
    DocumentStore, GroupView, StoreError, StoreResult,
    indices::{GroupIndex, IndexedGroup},
};

#[derive(Debug, Default)]
struct MemoryState {
    messages: HashMap<MessageId, FailedMessage>,
    operations: HashMap<String, Versioned<OperationRecord>>,
    batches: HashMap<String, BatchRecord>,
    index: GroupIndex,
    auto_refresh: bool,
}

/// [`DocumentStore`] held entirely in memory.
///
/// Documents are authoritative and consistent. The group index is a separate
/// projection: rebuilt after every commit by default, or only on
/// [`InMemoryDocumentStore::refresh_index`] when built with
/// [`InMemoryDocumentStore::with_stale_index`].
#[derive(Debug)]
pub struct InMemoryDocumentStore {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    /// Store whose index tracks every commit.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                auto_refresh: true,
                ..MemoryState::default()
            }),
        }
    }

    /// Store whose index only moves on [`InMemoryDocumentStore::refresh_index`].
    pub fn with_stale_index() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Switches automatic index refresh on or off.
    pub fn set_auto_refresh(&self, auto_refresh: bool) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.auto_refresh = auto_refresh;
        if auto_refresh {
            state.rebuild_index();
        }
        Ok(())
    }

    /// Brings the index up to date with the documents.
    pub fn refresh_index(&self) -> StoreResult<()> {
        self.lock()?.rebuild_index();
        Ok(())
    }

    /// Stores messages in one commit.
    pub fn insert_messages(&self, messages: impl IntoIterator<Item = FailedMessage>) -> StoreResult<()> {
        let mut uow = UnitOfWork::new();
        for message in messages {
            uow.stage(Command::PutMessage { message });
        }
        self.commit(uow)
    }

    /// Ids of all stored batch records, sorted.
    pub fn batch_ids(&self) -> StoreResult<Vec<String>> {
        let state = self.lock()?;
        let mut ids: Vec<String> = state.batches.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    /// Number of stored messages currently in `status`, read from documents.
    pub fn count_with_status(&self, status: MessageStatus) -> StoreResult<usize> {
        let state = self.lock()?;
        Ok(state.messages.values().filter(|m| m.status == status).count())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl MemoryState {
    fn check_versions(&self, commands: &[Command]) -> StoreResult<()> {
        let mut overlay: HashMap<&str, Option<Version>> = HashMap::new();

        for cmd in commands {
            match cmd {
                Command::PutOperation {
                    record,
                    expected_version,
                } => {
                    let current = self.current_version(&overlay, &record.id);
                    if current != *expected_version {
                        return Err(StoreError::Conflict {
                            document_id: record.id.clone(),
                        });
                    }
                    overlay.insert(&record.id, Some(current.map_or(1, |v| v + 1)));
                }
                Command::DeleteOperation {
                    id,
                    expected_version,
                } => {
                    if self.current_version(&overlay, id) != Some(*expected_version) {
                        return Err(StoreError::Conflict {
                            document_id: id.clone(),
                        });
                    }
                    overlay.insert(id, None);
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn current_version(&self, overlay: &HashMap<&str, Option<Version>>, id: &str) -> Option<Version> {
        match overlay.get(id) {
            Some(v) => *v,
            None => self.operations.get(id).map(|o| o.version),
        }
    }

    fn apply(&mut self, cmd: Command) {
        match cmd {
            Command::PutMessage { message } => {
                self.messages.insert(message.id.clone(), message);
            }
            Command::PatchMessages { ids, patch } => {
                for id in ids {
                    if let Some(msg) = self.messages.get_mut(&id) {
                        patch.apply_to(msg);
                    }
                }
            }
            Command::PutOperation { record, .. } => {
                let version = self
                    .operations
                    .get(&record.id)
                    .map_or(1, |o| o.version + 1);
                self.operations
                    .insert(record.id.clone(), Versioned { value: record, version });
            }
            Command::DeleteOperation { id, .. } => {
                self.operations.remove(&id);
            }
            Command::PutBatch { batch } => {
                self.batches.insert(batch.id.clone(), batch);
            }
            Command::DeleteBatch { id } => {
                self.batches.remove(&id);
            }
        }
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for msg in self.messages.values() {
            for group in &msg.failure_groups {
                let entry: &mut IndexedGroup = self
                    .index
                    .entry((group.id.clone(), msg.status))
                    .or_default();
                entry.title.clone_from(&group.title);
                entry.ids.insert(msg.id.clone());
            }
        }
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn group_view(&self, group_id: &str, status: MessageStatus) -> StoreResult<Option<GroupView>> {
        let state = self.lock()?;
        Ok(state
            .index
            .get(&(group_id.to_string(), status))
            .filter(|g| !g.ids.is_empty())
            .map(|g| GroupView {
                id: group_id.to_string(),
                title: g.title.clone(),
                count: g.ids.len(),
            }))
    }

    fn page_group_message_ids(
        &self,
        group_id: &str,
        status: MessageStatus,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<MessageId>> {
        let state = self.lock()?;
        let Some(group) = state.index.get(&(group_id.to_string(), status)) else {
            return Ok(Vec::new());
        };

        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        Ok(group
            .ids
            .range::<str, _>((lower, Bound::Unbounded))
            .take(limit)
            .cloned()
            .collect())
    }

    fn load_message(&self, id: &str) -> StoreResult<Option<FailedMessage>> {
        Ok(self.lock()?.messages.get(id).cloned())
    }

    fn load_operation(&self, id: &str) -> StoreResult<Option<Versioned<OperationRecord>>> {
        Ok(self.lock()?.operations.get(id).cloned())
    }

    fn list_operations(&self) -> StoreResult<Vec<Versioned<OperationRecord>>> {
        let state = self.lock()?;
        let mut ops: Vec<_> = state.operations.values().cloned().collect();
        ops.sort_by(|a, b| a.value.id.cmp(&b.value.id));
        Ok(ops)
    }

    fn load_batch(&self, id: &str) -> StoreResult<Option<BatchRecord>> {
        Ok(self.lock()?.batches.get(id).cloned())
    }

    fn commit(&self, uow: UnitOfWork) -> StoreResult<()> {
        let mut state = self.lock()?;
        state.check_versions(uow.commands())?;
        for cmd in uow.into_commands() {
            state.apply(cmd);
        }
        if state.auto_refresh {
            state.rebuild_index();
        }
        Ok(())
    }
}
