//! Domain events and their fire-and-forget publishers.

use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{GroupId, OperationKind};

use super::manager::OperationSummary;

/// Events emitted by the archiver and the operation state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    /// One archive batch was committed.
    FailedMessageGroupBatchArchived {
        /// Group the batch belongs to.
        group_id: GroupId,
        /// Message ids without the storage prefix.
        message_ids: Vec<String>,
    },
    /// Every archive batch of a group was committed.
    FailedMessageGroupArchived {
        /// Archived group.
        group_id: GroupId,
        /// Group title at planning time.
        group_name: String,
        /// Message count at planning time.
        message_count: usize,
    },
    /// One unarchive batch was committed.
    FailedMessageGroupBatchUnarchived {
        /// Group the batch belongs to.
        group_id: GroupId,
        /// Message ids without the storage prefix.
        message_ids: Vec<String>,
    },
    /// Every unarchive batch of a group was committed.
    FailedMessageGroupUnarchived {
        /// Unarchived group.
        group_id: GroupId,
        /// Group title at planning time.
        group_name: String,
        /// Message count at planning time.
        message_count: usize,
    },
    /// An operation entered `InProgress`.
    OperationStarting {
        /// State after the transition.
        summary: OperationSummary,
    },
    /// An operation committed one more batch.
    OperationBatchCompleted {
        /// State after the transition.
        summary: OperationSummary,
    },
    /// An operation is waiting for the index to converge.
    OperationFinalizing {
        /// State after the transition.
        summary: OperationSummary,
    },
    /// An operation reached `Completed`.
    OperationCompleted {
        /// State after the transition.
        summary: OperationSummary,
    },
}

impl DomainEvent {
    /// Batch event for `kind`.
    pub fn batch_processed(kind: OperationKind, group_id: GroupId, message_ids: Vec<String>) -> Self {
        match kind {
            OperationKind::Archive => Self::FailedMessageGroupBatchArchived {
                group_id,
                message_ids,
            },
            OperationKind::Unarchive => Self::FailedMessageGroupBatchUnarchived {
                group_id,
                message_ids,
            },
        }
    }

    /// Group completion event for `kind`.
    pub fn group_processed(
        kind: OperationKind,
        group_id: GroupId,
        group_name: String,
        message_count: usize,
    ) -> Self {
        match kind {
            OperationKind::Archive => Self::FailedMessageGroupArchived {
                group_id,
                group_name,
                message_count,
            },
            OperationKind::Unarchive => Self::FailedMessageGroupUnarchived {
                group_id,
                group_name,
                message_count,
            },
        }
    }
}

/// Sink for domain events. Publishing never fails from the caller's view.
pub trait DomainEventPublisher: Send + Sync {
    /// Hands `event` to subscribers.
    fn publish(&self, event: DomainEvent);
}

/// Publisher backed by a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastEventPublisher {
    events_tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventPublisher {
    /// Creates a publisher buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (events_tx, _) = broadcast::channel(capacity.max(1));
        Self { events_tx }
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events_tx.subscribe()
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl DomainEventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: DomainEvent) {
        if let Err(err) = self.events_tx.send(event) {
            debug!(event = ?err.0, "no subscribers, dropping domain event");
        }
    }
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventPublisher;

impl DomainEventPublisher for NullEventPublisher {
    fn publish(&self, _event: DomainEvent) {}
}
