//! Per-batch status patching with atomic progress bookkeeping.

use tracing::{debug, warn};

use crate::{
    message::MessagePatch,
    record::{OperationRecord, Versioned},
    store::{DocumentStore, StoreError, StoreResult},
    types::MessageId,
    uow::{Command, UnitOfWork},
};

/// Result of one executor step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Operation record as committed, with its new version.
    pub record: Versioned<OperationRecord>,
    /// Patched message ids; `None` when the batch slot had no record.
    pub message_ids: Option<Vec<MessageId>>,
}

/// Executes the batch at `record.current_batch`.
///
/// The status patch, the batch delete and the advanced operation record are
/// committed as one unit under the record's version, so a failure leaves the
/// operation at its pre-batch checkpoint. A missing batch record still
/// advances the cursor with nothing processed.
pub fn execute_next_batch(
    store: &dyn DocumentStore,
    record: &Versioned<OperationRecord>,
) -> StoreResult<BatchOutcome> {
    let current = &record.value;
    if current.is_drained() {
        return Err(StoreError::Message(format!(
            "operation {} has no batch left ({} of {})",
            current.id, current.current_batch, current.total_batches
        )));
    }

    let batch_id = current.batch_id(current.current_batch);
    let batch = store.load_batch(&batch_id)?;

    let mut next = current.clone();
    next.current_batch += 1;

    let mut uow = UnitOfWork::new();
    let message_ids = match batch {
        Some(batch) => {
            next.processed_count += batch.message_ids.len();
            uow.stage(Command::PatchMessages {
                ids: batch.message_ids.clone(),
                patch: MessagePatch::set_status(current.kind.target_status()),
            });
            uow.stage(Command::DeleteBatch { id: batch.id });
            Some(batch.message_ids)
        }
        None => {
            warn!(
                group_id = %current.request_id,
                kind = %current.kind,
                batch = current.current_batch,
                batch_id = %batch_id,
                "missing batch record; advancing with zero messages processed"
            );
            None
        }
    };
    uow.stage(Command::PutOperation {
        record: next.clone(),
        expected_version: Some(record.version),
    });

    store.commit(uow)?;
    debug!(
        group_id = %next.request_id,
        kind = %next.kind,
        batch = current.current_batch,
        processed = next.processed_count,
        "batch committed"
    );

    Ok(BatchOutcome {
        record: Versioned {
            value: next,
            version: record.version + 1,
        },
        message_ids,
    })
}
