//! Idempotent split of a group into durable batch records.

use tracing::{debug, info, warn};

use crate::{
    record::{BatchRecord, OperationRecord, Versioned},
    store::{DocumentStore, StoreResult},
    types::{ArchiveType, MessageId, OperationKind, now_ms},
    uow::{Command, UnitOfWork},
};

use super::snapshot::{IdStream, group_details};

/// Inputs for [`load_or_create_operation`].
#[derive(Debug, Clone, Copy)]
pub struct PlanRequest<'a> {
    /// Archive or unarchive.
    pub kind: OperationKind,
    /// Group to plan.
    pub group_id: &'a str,
    /// Classifier of `group_id`.
    pub archive_type: ArchiveType,
    /// Maximum message ids per batch record.
    pub batch_size: usize,
    /// Ids fetched per index page while streaming.
    pub page_size: usize,
}

/// Result of planning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// The index has no message to process.
    NothingToDo {
        /// Group title as the index reports it.
        group_name: String,
    },
    /// A new operation and its batches were committed.
    Created(Versioned<OperationRecord>),
    /// An operation already existed and is returned unchanged.
    Resumed(Versioned<OperationRecord>),
}

impl PlanOutcome {
    /// The operation record to execute, if any.
    pub fn into_record(self) -> Option<Versioned<OperationRecord>> {
        match self {
            Self::NothingToDo { .. } => None,
            Self::Created(record) | Self::Resumed(record) => Some(record),
        }
    }
}

/// Loads the in-flight operation for the request, or plans a new one.
///
/// Planning commits every batch record and the operation record in one unit
/// of work guarded by an "operation must not exist" check. Losing that race
/// to a concurrent planner falls back to resuming the winner's record.
pub fn load_or_create_operation(
    store: &dyn DocumentStore,
    req: &PlanRequest<'_>,
) -> StoreResult<PlanOutcome> {
    let operation_id = OperationRecord::make_id(req.kind, req.group_id, req.archive_type);
    if let Some(existing) = store.load_operation(&operation_id)? {
        debug!(
            group_id = req.group_id,
            kind = %req.kind,
            batch = existing.value.current_batch,
            "resuming existing operation"
        );
        return Ok(PlanOutcome::Resumed(existing));
    }

    let status = req.kind.source_status();
    let details = group_details(store, req.group_id, status)?;
    if details.message_count == 0 {
        info!(group_id = req.group_id, kind = %req.kind, "No messages to {}", req.kind);
        return Ok(PlanOutcome::NothingToDo {
            group_name: details.group_name,
        });
    }

    let batch_size = req.batch_size.max(1);
    let total_batches = details.message_count.div_ceil(batch_size);

    let mut uow = UnitOfWork::new();
    let mut chunk: Vec<MessageId> = Vec::with_capacity(batch_size);
    let mut batch_index = 0usize;
    let mut streamed = 0usize;

    for id in IdStream::new(store, req.group_id, status, req.page_size) {
        let id = id?;
        if streamed == details.message_count {
            warn!(
                group_id = req.group_id,
                kind = %req.kind,
                counted = details.message_count,
                "index returned more ids than it counted; extra messages are left for a later run"
            );
            break;
        }
        streamed += 1;
        chunk.push(id);
        if chunk.len() == batch_size {
            stage_batch(&mut uow, &operation_id, batch_index, std::mem::take(&mut chunk));
            batch_index += 1;
        }
    }
    if !chunk.is_empty() {
        stage_batch(&mut uow, &operation_id, batch_index, chunk);
    }

    if streamed < details.message_count {
        warn!(
            group_id = req.group_id,
            kind = %req.kind,
            counted = details.message_count,
            streamed,
            "index returned fewer ids than it counted; trailing batch slots will be empty"
        );
    }

    let record = OperationRecord {
        id: operation_id.clone(),
        request_id: req.group_id.to_string(),
        kind: req.kind,
        archive_type: req.archive_type,
        total_message_count: details.message_count,
        processed_count: 0,
        started_at_ms: now_ms(),
        group_name: details.group_name,
        total_batches,
        current_batch: 0,
    };
    uow.stage(Command::PutOperation {
        record: record.clone(),
        expected_version: None,
    });

    match store.commit(uow) {
        Ok(()) => {
            info!(
                group_id = req.group_id,
                kind = %req.kind,
                messages = record.total_message_count,
                batches = total_batches,
                "planned operation"
            );
            Ok(PlanOutcome::Created(Versioned {
                value: record,
                version: 1,
            }))
        }
        Err(err) if err.is_conflict() => match store.load_operation(&operation_id)? {
            Some(existing) => {
                info!(
                    group_id = req.group_id,
                    kind = %req.kind,
                    "operation planned concurrently elsewhere; resuming it"
                );
                Ok(PlanOutcome::Resumed(existing))
            }
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

fn stage_batch(uow: &mut UnitOfWork, operation_id: &str, batch_index: usize, message_ids: Vec<MessageId>) {
    uow.stage(Command::PutBatch {
        batch: BatchRecord {
            id: BatchRecord::make_id(operation_id, batch_index),
            operation_id: operation_id.to_string(),
            batch_index,
            message_ids,
        },
    });
}
