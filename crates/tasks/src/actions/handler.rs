//! Action handler for trash controls
//!
//! Decides whether a trash action is worth a task, builds it and waits for
//! the local store to reflect it. Server state follows later through the
//! sync process.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::models::{AccountId, Folder, FolderRole, Message, Thread};
use crate::queue::TaskQueue;
use crate::storage::MailStore;
use crate::tasks::{ChangeFolderTask, TaskError, TaskId, needs_move};

/// Resolves well-known folders for an account
pub trait CategoryLookup: Send + Sync {
    /// The account's trash folder, if it has one
    fn trash_folder(&self, account_id: &AccountId) -> Option<Folder>;
}

/// [`CategoryLookup`] backed by folder roles in a [`MailStore`]
pub struct StoreCategories {
    store: Arc<dyn MailStore>,
}

impl StoreCategories {
    pub fn new(store: Arc<dyn MailStore>) -> Self {
        Self { store }
    }
}

impl CategoryLookup for StoreCategories {
    fn trash_folder(&self, account_id: &AccountId) -> Option<Folder> {
        match self.store.find_folder_by_role(account_id, FolderRole::Trash) {
            Ok(folder) => folder,
            Err(e) => {
                warn!("Failed to look up trash folder for {}: {:#}", account_id, e);
                None
            }
        }
    }
}

/// What a trash action ended up doing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrashOutcome {
    /// A task was queued and applied locally
    Queued(TaskId),
    /// The account has no trash folder; nothing was queued
    NoTrashFolder,
    /// Everything targeted is already in the trash; nothing was queued
    AlreadyInTrash,
}

/// Handler for trash actions
pub struct ActionHandler {
    store: Arc<dyn MailStore>,
    categories: Arc<dyn CategoryLookup>,
    queue: TaskQueue,
}

impl ActionHandler {
    /// Create a new action handler
    pub fn new(store: Arc<dyn MailStore>, categories: Arc<dyn CategoryLookup>, queue: TaskQueue) -> Self {
        Self {
            store,
            categories,
            queue,
        }
    }

    /// The folder a trash control for `message` would move it to
    ///
    /// `None` means the control should be disabled.
    pub fn trash_target(&self, message: &Message) -> Option<Folder> {
        let trash = self.categories.trash_folder(&message.account_id)?;
        needs_move(message, &trash).then_some(trash)
    }

    /// Move one message to its account's trash
    pub async fn move_message_to_trash(
        &self,
        message: &Message,
        source: &str,
    ) -> Result<TrashOutcome, TaskError> {
        let Some(trash) = self.categories.trash_folder(&message.account_id) else {
            debug!("No trash folder for account {}; not trashing {}", message.account_id, message.id);
            return Ok(TrashOutcome::NoTrashFolder);
        };
        if !needs_move(message, &trash) {
            debug!("Message {} is already in {}", message.id, trash.id);
            return Ok(TrashOutcome::AlreadyInTrash);
        }

        let task = ChangeFolderTask::builder(trash)
            .messages(std::slice::from_ref(message))
            .source(source)
            .build()?;
        self.submit(task).await
    }

    /// Move every message of a thread to its account's trash
    pub async fn move_thread_to_trash(
        &self,
        thread: &Thread,
        source: &str,
    ) -> Result<TrashOutcome, TaskError> {
        let Some(trash) = self.categories.trash_folder(&thread.account_id) else {
            debug!("No trash folder for account {}; not trashing thread {}", thread.account_id, thread.id);
            return Ok(TrashOutcome::NoTrashFolder);
        };

        let task = ChangeFolderTask::builder(trash)
            .threads(std::slice::from_ref(thread))
            .source(source)
            .build()?;
        if task.pending_messages(self.store.as_ref())?.is_empty() {
            debug!("Thread {} has nothing outside the trash", thread.id);
            return Ok(TrashOutcome::AlreadyInTrash);
        }
        self.submit(task).await
    }

    async fn submit(&self, task: ChangeFolderTask) -> Result<TrashOutcome, TaskError> {
        let Some(id) = self.queue.queue_task(task)? else {
            return Ok(TrashOutcome::AlreadyInTrash);
        };
        self.queue.wait_for_perform_local(&id).await?;
        info!("Moved to trash locally (task {})", id);
        Ok(TrashOutcome::Queued(id))
    }
}
