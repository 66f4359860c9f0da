//! Tasks crate - Local-first mutation engine for a mail client
//!
//! User actions are encoded as persisted, retryable tasks that are applied
//! to the local store first and handed to a separate sync process after.
//! This crate provides:
//! - Domain models (Folder, Thread, Message)
//! - Storage trait abstractions with in-memory and SQLite backends
//! - The task types and their JSON wire format
//! - The task queue, which orders, applies and hands over tasks
//! - Call-site action handlers that guard against no-op tasks

pub mod actions;
pub mod config;
pub mod models;
pub mod queue;
pub mod storage;
pub mod tasks;

pub use actions::{ActionHandler, CategoryLookup, StoreCategories, TrashOutcome};
pub use config::QueueConfig;
pub use models::{AccountId, Folder, FolderId, FolderRole, Message, MessageId, Thread, ThreadId};
pub use queue::{LocalOutcome, SyncBridge, SyncRequest, TaskQueue};
pub use storage::{InMemoryMailStore, MailStore, SqliteMailStore, TaskRecord};
pub use tasks::{ChangeFolderTask, ChangeMailTask, Task, TaskError, TaskId, TaskStatus, needs_move};
