#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use grouparchive::{
    message::{FailedMessage, FailureGroupRef},
    record::{BatchRecord, OperationRecord, Versioned},
    store::{DocumentStore, GroupView, StoreError, StoreResult},
    tracking::events::DomainEvent,
    types::{MessageId, MessageStatus},
    uow::{Command, UnitOfWork},
};
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn message(group: &str, i: usize, status: MessageStatus) -> FailedMessage {
    FailedMessage {
        id: FailedMessage::make_id(&format!("{group}-{i:06}")),
        status,
        failure_groups: vec![FailureGroupRef {
            id: group.to_string(),
            title: format!("Exception in {group}"),
            group_type: "Exception Type and Stack Trace".to_string(),
        }],
        message_type: "Billing.ChargeCard".to_string(),
        exception_message: "card declined".to_string(),
        time_of_failure_ms: i as u64,
    }
}

pub fn messages(group: &str, n: usize, status: MessageStatus) -> Vec<FailedMessage> {
    (0..n).map(|i| message(group, i, status)).collect()
}

pub fn drain(rx: &mut broadcast::Receiver<DomainEvent>) -> Vec<DomainEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// Wraps a store, fails chosen commits and counts successful plans.
pub struct FlakyStore {
    inner: Arc<dyn DocumentStore>,
    commits: AtomicUsize,
    fail_on: AtomicUsize,
    plans: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            commits: AtomicUsize::new(0),
            fail_on: AtomicUsize::new(0),
            plans: AtomicUsize::new(0),
        }
    }

    /// Fails the `n`th commit from now (1-based). Zero disables.
    pub fn fail_commit(&self, n: usize) {
        let seen = self.commits.load(Ordering::SeqCst);
        self.fail_on
            .store(if n == 0 { 0 } else { seen + n }, Ordering::SeqCst);
    }

    /// Successful commits that created an operation record.
    pub fn plans(&self) -> usize {
        self.plans.load(Ordering::SeqCst)
    }
}

impl DocumentStore for FlakyStore {
    fn group_view(&self, group_id: &str, status: MessageStatus) -> StoreResult<Option<GroupView>> {
        self.inner.group_view(group_id, status)
    }

    fn page_group_message_ids(
        &self,
        group_id: &str,
        status: MessageStatus,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<MessageId>> {
        self.inner.page_group_message_ids(group_id, status, after, limit)
    }

    fn load_message(&self, id: &str) -> StoreResult<Option<FailedMessage>> {
        self.inner.load_message(id)
    }

    fn load_operation(&self, id: &str) -> StoreResult<Option<Versioned<OperationRecord>>> {
        self.inner.load_operation(id)
    }

    fn list_operations(&self) -> StoreResult<Vec<Versioned<OperationRecord>>> {
        self.inner.list_operations()
    }

    fn load_batch(&self, id: &str) -> StoreResult<Option<BatchRecord>> {
        self.inner.load_batch(id)
    }

    fn commit(&self, uow: UnitOfWork) -> StoreResult<()> {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("injected failure on commit {n}")));
        }
        let creates = uow.commands().iter().any(|cmd| {
            matches!(
                cmd,
                Command::PutOperation {
                    expected_version: None,
                    ..
                }
            )
        });
        self.inner.commit(uow)?;
        if creates {
            self.plans.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

type Hook = Box<dyn FnOnce() + Send>;

/// Wraps a store and runs a hook right after the `n`th `load_operation`
/// read, before its result reaches the caller.
pub struct HookedStore {
    inner: Arc<dyn DocumentStore>,
    loads: AtomicUsize,
    hooks: Mutex<HashMap<usize, Hook>>,
}

impl HookedStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            loads: AtomicUsize::new(0),
            hooks: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `hook` after the `n`th operation load (1-based).
    pub fn after_load_operation(&self, n: usize, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().expect("hooks").insert(n, Box::new(hook));
    }
}

impl DocumentStore for HookedStore {
    fn group_view(&self, group_id: &str, status: MessageStatus) -> StoreResult<Option<GroupView>> {
        self.inner.group_view(group_id, status)
    }

    fn page_group_message_ids(
        &self,
        group_id: &str,
        status: MessageStatus,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<MessageId>> {
        self.inner.page_group_message_ids(group_id, status, after, limit)
    }

    fn load_message(&self, id: &str) -> StoreResult<Option<FailedMessage>> {
        self.inner.load_message(id)
    }

    fn load_operation(&self, id: &str) -> StoreResult<Option<Versioned<OperationRecord>>> {
        let loaded = self.inner.load_operation(id);
        let n = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
        let hook = self.hooks.lock().expect("hooks").remove(&n);
        if let Some(hook) = hook {
            hook();
        }
        loaded
    }

    fn list_operations(&self) -> StoreResult<Vec<Versioned<OperationRecord>>> {
        self.inner.list_operations()
    }

    fn load_batch(&self, id: &str) -> StoreResult<Option<BatchRecord>> {
        self.inner.load_batch(id)
    }

    fn commit(&self, uow: UnitOfWork) -> StoreResult<()> {
        self.inner.commit(uow)
    }
}
