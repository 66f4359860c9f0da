//! Folder move task

use std::ops::{Deref, DerefMut};

use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{ChangeMailTask, Task, TaskError};
use crate::models::{AccountId, Folder, Message, MessageId, Thread, ThreadId};
use crate::storage::MailStore;

/// Moves threads and messages into a folder
///
/// Serialized with the `ChangeFolderTask` discriminator; see [`Task`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeFolderTask {
    #[serde(flatten)]
    mail: ChangeMailTask,
}

impl ChangeFolderTask {
    /// Start building a move into `folder`
    pub fn builder(folder: Folder) -> ChangeFolderTaskBuilder {
        ChangeFolderTaskBuilder::new(folder)
    }

    /// Apply the move to the local store
    ///
    /// Only messages that are not yet in the target folder are written, so
    /// running this again after it succeeded changes nothing. Returns the
    /// number of messages moved.
    pub fn perform_local(&self, store: &dyn MailStore) -> Result<usize> {
        let pending = self.pending_messages(store)?;
        if pending.is_empty() {
            debug!("Task {} has nothing left to move", self.id());
            return Ok(0);
        }

        let folder_id = &self.folder().id;
        for id in &pending {
            store.set_message_folder(id, folder_id)?;
        }

        info!(
            "Task {} moved {} message(s) to folder {}",
            self.id(),
            pending.len(),
            folder_id
        );
        Ok(pending.len())
    }

    /// Canonical serialized form, including the discriminator
    pub fn to_json(&self) -> Result<serde_json::Value, TaskError> {
        Task::from(self.clone()).to_json()
    }
}

impl Deref for ChangeFolderTask {
    type Target = ChangeMailTask;

    fn deref(&self) -> &ChangeMailTask {
        &self.mail
    }
}

impl DerefMut for ChangeFolderTask {
    fn deref_mut(&mut self) -> &mut ChangeMailTask {
        &mut self.mail
    }
}

/// Builder for [`ChangeFolderTask`]
///
/// Takes entities but keeps only their identifiers.
pub struct ChangeFolderTaskBuilder {
    folder: Folder,
    thread_ids: Vec<ThreadId>,
    message_ids: Vec<MessageId>,
    source: String,
    mismatch: Option<String>,
}

impl ChangeFolderTaskBuilder {
    fn new(folder: Folder) -> Self {
        Self {
            folder,
            thread_ids: Vec::new(),
            message_ids: Vec::new(),
            source: String::new(),
            mismatch: None,
        }
    }

    pub fn threads(mut self, threads: &[Thread]) -> Self {
        for thread in threads {
            self.check_account("thread", thread.id.as_str(), &thread.account_id);
            self.thread_ids.push(thread.id.clone());
        }
        self
    }

    pub fn messages(mut self, messages: &[Message]) -> Self {
        for message in messages {
            self.check_account("message", message.id.as_str(), &message.account_id);
            self.message_ids.push(message.id.clone());
        }
        self
    }

    /// Provenance tag recorded with the task
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn build(self) -> Result<ChangeFolderTask, TaskError> {
        if let Some(mismatch) = self.mismatch {
            return Err(TaskError::InvalidTask(mismatch));
        }
        let mail = ChangeMailTask::new(self.folder, self.thread_ids, self.message_ids, self.source)?;
        Ok(ChangeFolderTask { mail })
    }

    fn check_account(&mut self, kind: &str, id: &str, account_id: &AccountId) {
        if self.mismatch.is_none() && *account_id != self.folder.account_id {
            self.mismatch = Some(format!(
                "{kind} {id} belongs to account {account_id}, folder {} to {}",
                self.folder.id, self.folder.account_id
            ));
        }
    }
}
