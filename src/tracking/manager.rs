//! In-memory state machine mirroring durable operation records.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;
use tracing::debug;

use crate::{
    record::OperationRecord,
    types::{ArchiveType, GroupId, OperationKind, now_ms},
};

use super::events::{DomainEvent, DomainEventPublisher};

/// Lifecycle of one tracked operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationState {
    /// No in-memory entry exists.
    NotStarted,
    /// Batches are being executed.
    InProgress,
    /// All batches committed, waiting for the index to converge.
    Finalizing,
    /// Done; kept until dismissed.
    Completed,
}

/// Identity of a tracked operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationKey {
    /// Group id.
    pub group_id: GroupId,
    /// Archive or unarchive.
    pub kind: OperationKind,
    /// Classifier of `group_id`.
    pub archive_type: ArchiveType,
}

impl OperationKey {
    /// Builds a key.
    pub fn new(kind: OperationKind, group_id: impl Into<GroupId>, archive_type: ArchiveType) -> Self {
        Self {
            group_id: group_id.into(),
            kind,
            archive_type,
        }
    }

    /// Key of the operation a durable record belongs to.
    pub fn for_record(record: &OperationRecord) -> Self {
        Self::new(record.kind, record.request_id.clone(), record.archive_type)
    }
}

/// Point-in-time view of a tracked operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSummary {
    /// Archive or unarchive.
    pub kind: OperationKind,
    /// Group id.
    pub request_id: GroupId,
    /// Classifier of `request_id`.
    pub archive_type: ArchiveType,
    /// Group title at planning time.
    pub group_name: String,
    /// Current state.
    pub state: OperationState,
    /// Message count at planning time.
    pub total_messages: usize,
    /// Messages patched so far.
    pub processed_messages: usize,
    /// Planned batch slots.
    pub total_batches: usize,
    /// Next batch slot to execute.
    pub current_batch: usize,
    /// Planning time in milliseconds since epoch.
    pub started_at_ms: u64,
    /// Last transition in milliseconds since epoch.
    pub last_update_ms: u64,
    /// Completion time, once completed.
    pub completed_at_ms: Option<u64>,
}

/// Progress figures derived from an [`OperationSummary`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperationProgress {
    /// Fraction of messages processed, 0.0 to 1.0, rounded to two places.
    pub percentage: f64,
    /// Messages still to process.
    pub messages_remaining: usize,
    /// True once completed.
    pub completed: bool,
}

impl OperationSummary {
    fn from_record(record: &OperationRecord, state: OperationState) -> Self {
        Self {
            kind: record.kind,
            request_id: record.request_id.clone(),
            archive_type: record.archive_type,
            group_name: record.group_name.clone(),
            state,
            total_messages: record.total_message_count,
            processed_messages: record.processed_count,
            total_batches: record.total_batches,
            current_batch: record.current_batch,
            started_at_ms: record.started_at_ms,
            last_update_ms: now_ms(),
            completed_at_ms: None,
        }
    }

    fn reconcile(&mut self, record: &OperationRecord) {
        self.group_name.clone_from(&record.group_name);
        self.total_messages = record.total_message_count;
        self.processed_messages = record.processed_count;
        self.total_batches = record.total_batches;
        self.current_batch = record.current_batch;
        self.last_update_ms = now_ms();
    }

    /// Key of this operation.
    pub fn key(&self) -> OperationKey {
        OperationKey::new(self.kind, self.request_id.clone(), self.archive_type)
    }

    /// True while batches run or the index wait is pending.
    pub fn is_in_progress(&self) -> bool {
        matches!(self.state, OperationState::InProgress | OperationState::Finalizing)
    }

    /// True when a completed operation has not been dismissed yet.
    pub fn needs_acknowledgement(&self) -> bool {
        self.state == OperationState::Completed
    }

    /// Progress figures.
    pub fn progress(&self) -> OperationProgress {
        let completed = self.state == OperationState::Completed;
        let percentage = if completed || self.total_messages == 0 {
            1.0
        } else {
            let raw = self.processed_messages.min(self.total_messages) as f64 / self.total_messages as f64;
            (raw * 100.0).round() / 100.0
        };
        OperationProgress {
            percentage,
            messages_remaining: self.total_messages.saturating_sub(self.processed_messages),
            completed,
        }
    }
}

/// Thread-safe map of tracked operations.
///
/// Advisory only: the durable [`OperationRecord`] decides resumability. Every
/// transition publishes an event after the map lock is released.
pub struct OperationManager {
    operations: Mutex<HashMap<OperationKey, OperationSummary>>,
    publisher: Arc<dyn DomainEventPublisher>,
}

impl OperationManager {
    /// Creates an empty manager publishing transitions to `publisher`.
    pub fn new(publisher: Arc<dyn DomainEventPublisher>) -> Self {
        Self {
            operations: Mutex::new(HashMap::new()),
            publisher,
        }
    }

    /// Moves the operation for `record` to `InProgress`.
    ///
    /// Re-entrant: an entry already in progress only has its counters
    /// reconciled with `record`, and no event is published. Returns true when
    /// a transition happened.
    pub fn start(&self, record: &OperationRecord) -> bool {
        let key = OperationKey::for_record(record);
        let started = {
            let mut ops = self.lock();
            let in_progress = ops.get(&key).is_some_and(OperationSummary::is_in_progress);
            if in_progress {
                if let Some(existing) = ops.get_mut(&key) {
                    existing.reconcile(record);
                }
                None
            } else {
                let summary = OperationSummary::from_record(record, OperationState::InProgress);
                ops.insert(key, summary.clone());
                Some(summary)
            }
        };

        match started {
            Some(summary) => {
                self.publisher.publish(DomainEvent::OperationStarting { summary });
                true
            }
            None => false,
        }
    }

    /// Tracks a durable record found after a restart, without publishing.
    ///
    /// Returns false when an entry already exists.
    pub fn hydrate(&self, record: &OperationRecord) -> bool {
        let key = OperationKey::for_record(record);
        let mut ops = self.lock();
        if ops.contains_key(&key) {
            return false;
        }
        ops.insert(key, OperationSummary::from_record(record, OperationState::InProgress));
        true
    }

    /// Mirrors the counters of a record just committed by the executor.
    pub fn batch_completed(&self, record: &OperationRecord) {
        let key = OperationKey::for_record(record);
        if let Some(summary) = self.update(&key, |s| s.reconcile(record)) {
            self.publisher
                .publish(DomainEvent::OperationBatchCompleted { summary });
        }
    }

    /// Copies the counters of `record` onto an entry that is still in
    /// progress. Never changes state and never publishes.
    ///
    /// Returns false when there is no in-progress entry.
    pub fn reconcile(&self, record: &OperationRecord) -> bool {
        let key = OperationKey::for_record(record);
        let mut ops = self.lock();
        match ops.get_mut(&key) {
            Some(summary) if summary.is_in_progress() => {
                summary.reconcile(record);
                true
            }
            _ => false,
        }
    }

    /// Moves an `InProgress` operation to `Finalizing`. Other states are left alone.
    pub fn finalizing(&self, key: &OperationKey) {
        let moved = {
            let mut ops = self.lock();
            match ops.get_mut(key) {
                Some(summary) if summary.state == OperationState::InProgress => {
                    summary.state = OperationState::Finalizing;
                    summary.last_update_ms = now_ms();
                    Some(summary.clone())
                }
                Some(summary) => {
                    debug!(group_id = %key.group_id, kind = %key.kind, state = ?summary.state, "finalizing ignored");
                    None
                }
                None => None,
            }
        };
        if let Some(summary) = moved {
            self.publisher.publish(DomainEvent::OperationFinalizing { summary });
        }
    }

    /// Moves an operation to `Completed`.
    pub fn complete(&self, key: &OperationKey) {
        let moved = self.update(key, |s| {
            let now = now_ms();
            s.state = OperationState::Completed;
            s.current_batch = s.total_batches;
            s.last_update_ms = now;
            s.completed_at_ms = Some(now);
        });
        if let Some(summary) = moved {
            self.publisher.publish(DomainEvent::OperationCompleted { summary });
        }
    }

    /// State of one operation; `NotStarted` when untracked.
    pub fn state(&self, key: &OperationKey) -> OperationState {
        self.lock()
            .get(key)
            .map_or(OperationState::NotStarted, |s| s.state)
    }

    /// Snapshot of one operation.
    pub fn summary(&self, key: &OperationKey) -> Option<OperationSummary> {
        self.lock().get(key).cloned()
    }

    /// True while the operation is `InProgress` or `Finalizing`.
    pub fn is_operation_in_progress_for(&self, key: &OperationKey) -> bool {
        self.lock().get(key).is_some_and(OperationSummary::is_in_progress)
    }

    /// True while any archive operation for `group_id` is in progress.
    pub fn is_archive_in_progress_for(&self, group_id: &str) -> bool {
        self.lock().values().any(|s| {
            s.kind == OperationKind::Archive && s.request_id == group_id && s.is_in_progress()
        })
    }

    /// Snapshots of every tracked operation, ordered by key.
    pub fn operations(&self) -> Vec<OperationSummary> {
        let mut out: Vec<OperationSummary> = self.lock().values().cloned().collect();
        out.sort_by_key(OperationSummary::key);
        out
    }

    /// Forgets an entry. Durable state is untouched.
    pub fn dismiss(&self, key: &OperationKey) -> bool {
        self.lock().remove(key).is_some()
    }

    fn update(
        &self,
        key: &OperationKey,
        f: impl FnOnce(&mut OperationSummary),
    ) -> Option<OperationSummary> {
        let mut ops = self.lock();
        let Some(summary) = ops.get_mut(key) else {
            debug!(group_id = %key.group_id, kind = %key.kind, "transition for untracked operation ignored");
            return None;
        };
        f(summary);
        Some(summary.clone())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperationKey, OperationSummary>> {
        self.operations.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::events::BroadcastEventPublisher;

    fn record(processed: usize, current: usize) -> OperationRecord {
        OperationRecord {
            id: OperationRecord::make_id(OperationKind::Archive, "g1", ArchiveType::FailureGroup),
            request_id: "g1".to_string(),
            kind: OperationKind::Archive,
            archive_type: ArchiveType::FailureGroup,
            total_message_count: 30,
            processed_count: processed,
            started_at_ms: 1,
            group_name: "Timeouts".to_string(),
            total_batches: 3,
            current_batch: current,
        }
    }

    fn manager() -> (OperationManager, BroadcastEventPublisher) {
        let publisher = BroadcastEventPublisher::new(64);
        (OperationManager::new(Arc::new(publisher.clone())), publisher)
    }

    #[test]
    fn walks_through_every_state() {
        let (mgr, publisher) = manager();
        let mut sub = publisher.subscribe();
        let key = OperationKey::new(OperationKind::Archive, "g1", ArchiveType::FailureGroup);

        assert_eq!(mgr.state(&key), OperationState::NotStarted);
        assert!(mgr.start(&record(0, 0)));
        assert_eq!(mgr.state(&key), OperationState::InProgress);

        mgr.batch_completed(&record(10, 1));
        let s = mgr.summary(&key).expect("tracked");
        assert_eq!((s.processed_messages, s.current_batch), (10, 1));
        assert_eq!(s.progress().percentage, 0.33);
        assert_eq!(s.progress().messages_remaining, 20);

        mgr.finalizing(&key);
        assert!(mgr.is_operation_in_progress_for(&key));
        mgr.complete(&key);
        assert!(!mgr.is_operation_in_progress_for(&key));
        assert!(mgr.summary(&key).expect("tracked").needs_acknowledgement());

        let kinds: Vec<&'static str> = std::iter::from_fn(|| sub.try_recv().ok())
            .map(|e| match e {
                DomainEvent::OperationStarting { .. } => "starting",
                DomainEvent::OperationBatchCompleted { .. } => "batch",
                DomainEvent::OperationFinalizing { .. } => "finalizing",
                DomainEvent::OperationCompleted { .. } => "completed",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["starting", "batch", "finalizing", "completed"]);
    }

    #[test]
    fn start_is_reentrant_while_in_progress() {
        let (mgr, publisher) = manager();
        let mut sub = publisher.subscribe();
        let key = OperationKey::new(OperationKind::Archive, "g1", ArchiveType::FailureGroup);

        assert!(mgr.start(&record(0, 0)));
        assert!(!mgr.start(&record(10, 1)));
        assert_eq!(mgr.summary(&key).expect("tracked").current_batch, 1);

        assert!(matches!(sub.try_recv(), Ok(DomainEvent::OperationStarting { .. })));
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn completed_operation_can_restart_and_be_dismissed() {
        let (mgr, _publisher) = manager();
        let key = OperationKey::new(OperationKind::Archive, "g1", ArchiveType::FailureGroup);

        mgr.start(&record(0, 0));
        mgr.complete(&key);
        assert!(mgr.start(&record(0, 0)));
        assert_eq!(mgr.state(&key), OperationState::InProgress);

        assert!(mgr.dismiss(&key));
        assert!(!mgr.dismiss(&key));
        assert_eq!(mgr.state(&key), OperationState::NotStarted);
    }

    #[test]
    fn archive_query_ignores_unarchive_and_other_groups() {
        let (mgr, _publisher) = manager();
        let mut unarchive = record(0, 0);
        unarchive.kind = OperationKind::Unarchive;
        unarchive.id = OperationRecord::make_id(OperationKind::Unarchive, "g1", ArchiveType::FailureGroup);
        mgr.start(&unarchive);

        assert!(!mgr.is_archive_in_progress_for("g1"));
        mgr.start(&record(0, 0));
        assert!(mgr.is_archive_in_progress_for("g1"));
        assert!(!mgr.is_archive_in_progress_for("g2"));
        assert_eq!(mgr.operations().len(), 2);
    }

    #[test]
    fn hydrate_only_fills_missing_entries() {
        let (mgr, publisher) = manager();
        let mut sub = publisher.subscribe();

        assert!(mgr.hydrate(&record(10, 1)));
        assert!(!mgr.hydrate(&record(20, 2)));
        assert!(mgr.is_archive_in_progress_for("g1"));
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn finalizing_only_applies_to_running_operations() {
        let (mgr, publisher) = manager();
        let key = OperationKey::new(OperationKind::Archive, "g1", ArchiveType::FailureGroup);

        mgr.finalizing(&key);
        assert_eq!(mgr.state(&key), OperationState::NotStarted);

        mgr.start(&record(0, 0));
        mgr.complete(&key);
        let mut sub = publisher.subscribe();
        mgr.finalizing(&key);
        assert_eq!(mgr.state(&key), OperationState::Completed);
        assert!(sub.try_recv().is_err());
    }

    #[test]
    fn reconcile_never_revives_a_completed_operation() {
        let (mgr, publisher) = manager();
        let key = OperationKey::new(OperationKind::Archive, "g1", ArchiveType::FailureGroup);

        assert!(!mgr.reconcile(&record(10, 1)));
        assert_eq!(mgr.state(&key), OperationState::NotStarted);

        mgr.start(&record(0, 0));
        assert!(mgr.reconcile(&record(10, 1)));
        assert_eq!(mgr.summary(&key).expect("tracked").current_batch, 1);
        assert_eq!(mgr.state(&key), OperationState::InProgress);

        mgr.complete(&key);
        let mut sub = publisher.subscribe();
        assert!(!mgr.reconcile(&record(20, 2)));
        assert_eq!(mgr.state(&key), OperationState::Completed);
        assert!(sub.try_recv().is_err());
    }
}
