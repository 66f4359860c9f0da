//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{AccountId, Folder, FolderId, FolderRole, Message, MessageId, Thread, ThreadId};
use crate::tasks::{Task, TaskError, TaskId, TaskStatus};

/// A task as kept in the task log
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub account_id: AccountId,
    pub status: TaskStatus,
    /// Serialized task (the JSON the sync process consumes)
    pub payload: String,
    /// When the task was first queued; orders replay after a restart
    pub queued_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Build a fresh record for a task entering the queue
    pub fn queued(task: &Task) -> Result<Self, TaskError> {
        Ok(Self {
            id: task.id().clone(),
            account_id: task.account_id().clone(),
            status: TaskStatus::Queued,
            payload: task.to_json()?.to_string(),
            queued_at: Utc::now(),
        })
    }

    /// Decode the payload back into a task carrying the record's id
    pub fn task(&self) -> Result<Task, TaskError> {
        Ok(Task::from_json(&self.payload)?.with_id(self.id.clone()))
    }
}

/// Trait for local mail storage operations
///
/// This trait abstracts over storage backends (in-memory, SQLite). Every
/// write must be visible to the next read once the call returns; task
/// local applies rely on that.
pub trait MailStore: Send + Sync {
    /// Insert or update a folder
    fn upsert_folder(&self, folder: Folder) -> Result<()>;

    /// Get a folder by ID
    fn get_folder(&self, id: &FolderId) -> Result<Option<Folder>>;

    /// List the folders of an account, ordered by name
    fn list_folders(&self, account_id: &AccountId) -> Result<Vec<Folder>>;

    /// Insert or update a thread
    fn upsert_thread(&self, thread: Thread) -> Result<()>;

    /// Get a thread by ID
    fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>>;

    /// Insert or update a message
    fn upsert_message(&self, message: Message) -> Result<()>;

    /// Get a message by ID
    fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// IDs of the messages in a thread, ordered by received_at ascending
    fn get_message_ids_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<MessageId>>;

    /// Messages currently in a folder, ordered by received_at ascending
    fn list_messages_in_folder(&self, folder_id: &FolderId) -> Result<Vec<Message>>;

    /// Move a message to a folder; missing messages are ignored
    fn set_message_folder(&self, id: &MessageId, folder_id: &FolderId) -> Result<()>;

    /// Insert or replace a task log record
    fn save_task(&self, record: TaskRecord) -> Result<()>;

    /// Get a task log record by ID
    fn get_task(&self, id: &TaskId) -> Result<Option<TaskRecord>>;

    /// Update the status of a task log record
    fn update_task_status(&self, id: &TaskId, status: TaskStatus) -> Result<()>;

    /// Records that are not Complete, in the order they were queued
    fn list_unsettled_tasks(&self) -> Result<Vec<TaskRecord>>;

    /// Clear all data (for testing)
    fn clear(&self) -> Result<()>;

    /// Find the folder of an account that has the given role
    fn find_folder_by_role(
        &self,
        account_id: &AccountId,
        role: FolderRole,
    ) -> Result<Option<Folder>> {
        Ok(self
            .list_folders(account_id)?
            .into_iter()
            .find(|folder| folder.has_role(role)))
    }
}
