//! Top-level archive/unarchive orchestration over a failure group.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{
    config::ArchiverConfig,
    message::strip_storage_prefix,
    record::{OperationRecord, Versioned},
    store::{DocumentStore, StoreError, StoreResult},
    tracking::{
        events::{DomainEvent, DomainEventPublisher},
        manager::{OperationKey, OperationManager, OperationState, OperationSummary},
    },
    types::{ArchiveType, OperationKind},
    uow::{Command, UnitOfWork},
};

use super::{
    executor::execute_next_batch,
    planner::{PlanOutcome, PlanRequest, load_or_create_operation},
};

/// Errors that abort one archiver call. Durable state stays at its last checkpoint.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The document store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Join(String),
}

impl ArchiveError {
    fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_conflict())
    }
}

/// How an archiver call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveOutcome {
    /// The index had no message in the source status.
    NothingToDo,
    /// Every batch committed and the operation record was removed.
    Completed {
        /// Group title at planning time.
        group_name: String,
        /// Message count at planning time.
        message_count: usize,
        /// Messages actually patched, lower when batch slots were empty.
        processed: usize,
        /// False when the index wait timed out.
        index_converged: bool,
    },
    /// Another caller advanced the same operation first; its progress stands.
    Superseded,
}

/// Drives archive and unarchive operations and answers progress queries.
///
/// Cheap to clone. Store calls run on the blocking thread pool.
#[derive(Clone)]
pub struct MessageArchiver {
    store: Arc<dyn DocumentStore>,
    manager: Arc<OperationManager>,
    publisher: Arc<dyn DomainEventPublisher>,
    config: ArchiverConfig,
}

impl MessageArchiver {
    /// Wires an archiver from its collaborators.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        manager: Arc<OperationManager>,
        publisher: Arc<dyn DomainEventPublisher>,
        config: ArchiverConfig,
    ) -> Self {
        Self {
            store,
            manager,
            publisher,
            config,
        }
    }

    /// Builds an archiver whose state machine publishes to the same sink.
    pub fn with_publisher(
        store: Arc<dyn DocumentStore>,
        publisher: Arc<dyn DomainEventPublisher>,
        config: ArchiverConfig,
    ) -> Self {
        let manager = Arc::new(OperationManager::new(Arc::clone(&publisher)));
        Self::new(store, manager, publisher, config)
    }

    /// The in-memory operation tracker.
    pub fn manager(&self) -> &Arc<OperationManager> {
        &self.manager
    }

    /// Archives every unresolved message of `group_id`.
    ///
    /// Idempotent: resumes an interrupted run and returns
    /// [`ArchiveOutcome::NothingToDo`] when nothing is left.
    pub async fn archive_all_in_group(&self, group_id: &str) -> Result<ArchiveOutcome, ArchiveError> {
        self.run(OperationKind::Archive, group_id).await
    }

    /// Moves every archived message of `group_id` back to unresolved.
    pub async fn unarchive_all_in_group(&self, group_id: &str) -> Result<ArchiveOutcome, ArchiveError> {
        self.run(OperationKind::Unarchive, group_id).await
    }

    /// True while the operation is in progress or finalizing.
    ///
    /// With no in-memory entry, a durable operation record still counts as
    /// in progress and is tracked from then on.
    pub async fn is_operation_in_progress_for(
        &self,
        group_id: &str,
        archive_type: ArchiveType,
        kind: OperationKind,
    ) -> Result<bool, ArchiveError> {
        let key = OperationKey::new(kind, group_id, archive_type);
        self.track_durable(&key).await?;
        Ok(self.manager.is_operation_in_progress_for(&key))
    }

    /// True while any archive of `group_id` is in progress, durable records included.
    pub async fn is_archive_in_progress_for(&self, group_id: &str) -> Result<bool, ArchiveError> {
        let key = OperationKey::new(OperationKind::Archive, group_id, ArchiveType::FailureGroup);
        self.track_durable(&key).await?;
        Ok(self.manager.is_archive_in_progress_for(group_id))
    }

    /// Every tracked operation, after picking up untracked durable records.
    pub async fn archival_operations(&self) -> Result<Vec<OperationSummary>, ArchiveError> {
        self.reconcile_tracking().await?;
        Ok(self.manager.operations())
    }

    /// Drops an operation from in-memory tracking only.
    pub fn dismiss_operation(&self, group_id: &str, archive_type: ArchiveType, kind: OperationKind) -> bool {
        self.manager
            .dismiss(&OperationKey::new(kind, group_id, archive_type))
    }

    /// Tracks every durable operation the manager does not know about.
    ///
    /// Returns the number of entries added.
    pub async fn reconcile_tracking(&self) -> Result<usize, ArchiveError> {
        let records = self.blocking(|store| store.list_operations()).await?;
        Ok(records
            .iter()
            .filter(|r| self.manager.hydrate(&r.value))
            .count())
    }

    /// Drives every durable operation to completion, one after another.
    pub async fn resume_incomplete_operations(&self) -> Result<Vec<(OperationKey, ArchiveOutcome)>, ArchiveError> {
        let records = self.blocking(|store| store.list_operations()).await?;
        if !records.is_empty() {
            info!(count = records.len(), "resuming incomplete operations");
        }

        let mut out = Vec::with_capacity(records.len());
        for record in records {
            let key = OperationKey::for_record(&record.value);
            let outcome = self.drive(record).await?;
            out.push((key, outcome));
        }
        Ok(out)
    }

    async fn run(&self, kind: OperationKind, group_id: &str) -> Result<ArchiveOutcome, ArchiveError> {
        let group = group_id.to_string();
        let batch_size = self.config.batch_size;
        let page_size = self.config.id_page_size;
        let plan = self
            .blocking(move |store| {
                load_or_create_operation(
                    store,
                    &PlanRequest {
                        kind,
                        group_id: &group,
                        archive_type: ArchiveType::FailureGroup,
                        batch_size,
                        page_size,
                    },
                )
            })
            .await?;

        match plan {
            PlanOutcome::NothingToDo { .. } => Ok(ArchiveOutcome::NothingToDo),
            PlanOutcome::Created(record) | PlanOutcome::Resumed(record) => self.drive(record).await,
        }
    }

    async fn drive(&self, mut record: Versioned<OperationRecord>) -> Result<ArchiveOutcome, ArchiveError> {
        let key = OperationKey::for_record(&record.value);
        let kind = key.kind;
        self.manager.start(&record.value);
        info!(
            group_id = %key.group_id,
            kind = %kind,
            batch = record.value.current_batch,
            batches = record.value.total_batches,
            "driving operation"
        );

        while !record.value.is_drained() {
            let current = record.clone();
            let step = match self
                .blocking(move |store| execute_next_batch(store, &current))
                .await
            {
                Ok(step) => step,
                Err(err) if err.is_conflict() => {
                    info!(group_id = %key.group_id, kind = %kind, "operation advanced by another caller; yielding");
                    self.settle_superseded(&key, &record.value.id).await;
                    return Ok(ArchiveOutcome::Superseded);
                }
                Err(err) => {
                    warn!(
                        group_id = %key.group_id,
                        kind = %kind,
                        batch = record.value.current_batch,
                        error = %err,
                        "batch failed; operation stays at its last committed batch"
                    );
                    return Err(err);
                }
            };

            if let Some(ids) = &step.message_ids {
                let ids = ids
                    .iter()
                    .map(|id| strip_storage_prefix(id).to_string())
                    .collect();
                self.publisher
                    .publish(DomainEvent::batch_processed(kind, key.group_id.clone(), ids));
            }
            self.manager.batch_completed(&step.record.value);
            record = step.record;
        }

        self.manager.finalizing(&key);
        let index_converged = self.wait_for_index(&record.value).await;

        let done = record.value;
        self.publisher.publish(DomainEvent::group_processed(
            kind,
            done.request_id.clone(),
            done.group_name.clone(),
            done.total_message_count,
        ));

        let id = done.id.clone();
        let version = record.version;
        let deleted = self
            .blocking(move |store| {
                let mut uow = UnitOfWork::new();
                uow.stage(Command::DeleteOperation {
                    id,
                    expected_version: version,
                });
                store.commit(uow)
            })
            .await;
        match deleted {
            Ok(()) => {}
            Err(err) if err.is_conflict() => {
                debug!(group_id = %key.group_id, kind = %kind, "operation record already removed elsewhere");
            }
            Err(err) => {
                warn!(
                    group_id = %key.group_id,
                    kind = %kind,
                    error = %err,
                    "group event published but operation record not removed; operation stays finalizing"
                );
                return Err(err);
            }
        }

        self.manager.complete(&key);
        info!(
            group_id = %key.group_id,
            kind = %kind,
            messages = done.total_message_count,
            processed = done.processed_count,
            index_converged,
            "operation completed"
        );

        Ok(ArchiveOutcome::Completed {
            group_name: done.group_name,
            message_count: done.total_message_count,
            processed: done.processed_count,
            index_converged,
        })
    }

    /// Polls the index until the group has no message left in the source
    /// status. Returns false on timeout; the operation completes regardless.
    async fn wait_for_index(&self, record: &OperationRecord) -> bool {
        let deadline = Instant::now() + self.config.index_convergence_timeout;
        let status = record.kind.source_status();

        loop {
            let group = record.request_id.clone();
            match self.blocking(move |store| store.group_view(&group, status)).await {
                Ok(None) => return true,
                Ok(Some(view)) => {
                    debug!(group_id = %record.request_id, remaining = view.count, "index not converged yet");
                }
                Err(err) => {
                    warn!(group_id = %record.request_id, error = %err, "index poll failed");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    group_id = %record.request_id,
                    kind = %record.kind,
                    timeout_ms = self.config.index_convergence_timeout.as_millis() as u64,
                    "index did not converge in time; completing anyway"
                );
                return false;
            }
            tokio::time::sleep(self.config.index_poll_interval.min(deadline - now)).await;
        }
    }

    /// After losing a race, mirrors the winner's counters onto a running entry,
    /// or completes the entry if the winner already removed the durable record.
    async fn settle_superseded(&self, key: &OperationKey, operation_id: &str) {
        let id = operation_id.to_string();
        match self.blocking(move |store| store.load_operation(&id)).await {
            Ok(Some(current)) => {
                self.manager.reconcile(&current.value);
            }
            Ok(None) => {
                if self.manager.is_operation_in_progress_for(key) {
                    self.manager.complete(key);
                }
            }
            Err(err) => {
                debug!(group_id = %key.group_id, error = %err, "could not reload operation after conflict");
            }
        }
    }

    /// Hydrates tracking for `key` from its durable record when untracked.
    async fn track_durable(&self, key: &OperationKey) -> Result<(), ArchiveError> {
        if self.manager.state(key) != OperationState::NotStarted {
            return Ok(());
        }
        let id = OperationRecord::make_id(key.kind, &key.group_id, key.archive_type);
        if let Some(record) = self.blocking(move |store| store.load_operation(&id)).await? {
            self.manager.hydrate(&record.value);
        }
        Ok(())
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ArchiveError>
    where
        F: FnOnce(&dyn DocumentStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| ArchiveError::Join(e.to_string()))?
            .map_err(ArchiveError::from)
    }
}
