//! Resumable bulk archival of failed messages by failure group.
//!
//! A group's ids are split into durable batch records, then each batch is
//! patched, deleted and checkpointed in one atomic unit of work. A crash at
//! any point resumes from the last committed batch.
//!
//! # Examples
//!
//! In-memory usage with [`store::memory::InMemoryDocumentStore`]:
//! ```
//! use std::sync::Arc;
//!
//! use grouparchive::{
//!     archive::archiver::{ArchiveOutcome, MessageArchiver},
//!     config::ArchiverConfig,
//!     message::{FailedMessage, FailureGroupRef},
//!     store::memory::InMemoryDocumentStore,
//!     tracking::events::BroadcastEventPublisher,
//!     types::MessageStatus,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(InMemoryDocumentStore::new());
//! store.insert_messages((0..3).map(|i| FailedMessage {
//!     id: FailedMessage::make_id(&format!("m{i}")),
//!     status: MessageStatus::Unresolved,
//!     failure_groups: vec![FailureGroupRef {
//!         id: "g1".to_string(),
//!         title: "NullReferenceException".to_string(),
//!         group_type: "Exception Type".to_string(),
//!     }],
//!     message_type: "Ping".to_string(),
//!     exception_message: "boom".to_string(),
//!     time_of_failure_ms: 0,
//! })).expect("seed");
//!
//! let publisher = Arc::new(BroadcastEventPublisher::default());
//! let archiver = MessageArchiver::with_publisher(store.clone(), publisher, ArchiverConfig::default());
//! let outcome = archiver.archive_all_in_group("g1").await.expect("archive");
//! assert!(matches!(outcome, ArchiveOutcome::Completed { message_count: 3, .. }));
//! assert_eq!(store.count_with_status(MessageStatus::Archived).expect("count"), 3);
//! # }
//! ```
//!
//! SQLite-backed usage:
//! ```no_run
//! use std::sync::Arc;
//!
//! use grouparchive::{
//!     archive::archiver::MessageArchiver,
//!     config::ArchiverConfig,
//!     store::sqlite::SqliteDocumentStore,
//!     tracking::events::BroadcastEventPublisher,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(SqliteDocumentStore::open("failed-messages.db").expect("open sqlite"));
//! let cfg = ArchiverConfig::from_env().expect("config");
//! let archiver = MessageArchiver::with_publisher(store, Arc::new(BroadcastEventPublisher::default()), cfg);
//! archiver.reconcile_tracking().await.expect("reconcile");
//! archiver.resume_incomplete_operations().await.expect("resume");
//! # }
//! ```
#![warn(missing_docs)]

/// Planner, executor and async orchestrator.
pub mod archive;
/// Tuning and environment overrides.
pub mod config;
/// Failed-message documents and patches.
pub mod message;
/// Durable operation and batch records.
pub mod record;
/// Document-store abstraction and implementations.
pub mod store;
/// Operation state machine and domain events.
pub mod tracking;
/// Shared primitive types and enums.
pub mod types;
/// Staged commands committed atomically.
pub mod uow;
