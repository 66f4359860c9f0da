//! Shared state and guard logic for tasks that move mail into a folder
//!
//! A [`ChangeMailTask`] holds copies of the targeted thread and message ids,
//! never the entities themselves, so editing a message after queueing does
//! not change what the task will do.

use std::collections::{BTreeSet, HashSet};

use anyhow::Result;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::{TaskError, TaskId};
use crate::models::{AccountId, Folder, Message, MessageId, ThreadId};
use crate::storage::MailStore;

/// Whether moving `message` into `folder` would change anything
///
/// The task applies this check to every message right before writing, and
/// call sites use it to avoid queueing trivial tasks at all.
pub fn needs_move(message: &Message, folder: &Folder) -> bool {
    !message.is_in_folder(folder)
}

/// Target folder plus the threads and messages to move into it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMailTask {
    /// Not part of the payload; the task log stores it next to the payload.
    #[serde(skip, default = "TaskId::generate")]
    id: TaskId,
    #[serde(rename = "aid")]
    account_id: AccountId,
    folder: Folder,
    #[serde(rename = "threadIds", default, skip_serializing_if = "Vec::is_empty")]
    thread_ids: Vec<ThreadId>,
    #[serde(rename = "messageIds", default, skip_serializing_if = "Vec::is_empty")]
    message_ids: Vec<MessageId>,
    #[serde(default)]
    source: String,
}

impl ChangeMailTask {
    /// Create a task owned by the folder's account
    pub fn new(
        folder: Folder,
        thread_ids: Vec<ThreadId>,
        message_ids: Vec<MessageId>,
        source: impl Into<String>,
    ) -> Result<Self, TaskError> {
        let task = Self {
            id: TaskId::generate(),
            account_id: folder.account_id.clone(),
            folder,
            thread_ids,
            message_ids,
            source: source.into(),
        };
        task.validate()?;
        Ok(task)
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn folder(&self) -> &Folder {
        &self.folder
    }

    pub fn thread_ids(&self) -> &[ThreadId] {
        &self.thread_ids
    }

    pub fn message_ids(&self) -> &[MessageId] {
        &self.message_ids
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// True when the task targets no thread and no message
    pub fn is_empty(&self) -> bool {
        self.thread_ids.is_empty() && self.message_ids.is_empty()
    }

    /// Replace the targeted threads
    pub fn set_thread_ids(&mut self, thread_ids: Vec<ThreadId>) -> Result<(), TaskError> {
        check_ids("thread", thread_ids.iter().map(ThreadId::as_str))?;
        self.thread_ids = thread_ids;
        Ok(())
    }

    /// Replace the targeted messages
    pub fn set_message_ids(&mut self, message_ids: Vec<MessageId>) -> Result<(), TaskError> {
        check_ids("message", message_ids.iter().map(MessageId::as_str))?;
        self.message_ids = message_ids;
        Ok(())
    }

    pub(crate) fn set_id(&mut self, id: TaskId) {
        self.id = id;
    }

    /// Check the invariants every queued or decoded task must satisfy
    pub fn validate(&self) -> Result<(), TaskError> {
        if self.account_id.is_empty() {
            return Err(TaskError::InvalidTask("account id is empty".to_string()));
        }
        if self.folder.id.as_str().is_empty() {
            return Err(TaskError::InvalidTask("target folder id is empty".to_string()));
        }
        if self.folder.account_id != self.account_id {
            return Err(TaskError::InvalidTask(format!(
                "folder {} belongs to account {}, task to {}",
                self.folder.id, self.folder.account_id, self.account_id
            )));
        }
        check_ids("thread", self.thread_ids.iter().map(ThreadId::as_str))?;
        check_ids("message", self.message_ids.iter().map(MessageId::as_str))
    }

    /// Messages that still have to move, after the no-op guard
    ///
    /// Threads are expanded to their current messages. The result keeps
    /// target order, drops duplicates, and skips messages that are already in
    /// the folder or no longer exist locally.
    pub fn pending_messages(&self, store: &dyn MailStore) -> Result<Vec<MessageId>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for thread_id in &self.thread_ids {
            for id in store.get_message_ids_for_thread(thread_id)? {
                if seen.insert(id.clone()) {
                    candidates.push(id);
                }
            }
        }
        for id in &self.message_ids {
            if seen.insert(id.clone()) {
                candidates.push(id.clone());
            }
        }

        let mut pending = Vec::with_capacity(candidates.len());
        for id in candidates {
            match store.get_message(&id)? {
                Some(message) if needs_move(&message, &self.folder) => pending.push(id),
                Some(_) => debug!("Message {} already in folder {}", id, self.folder.id),
                None => debug!("Message {} no longer exists locally", id),
            }
        }

        Ok(pending)
    }

    /// Entity keys this task writes to
    ///
    /// Thread targets contribute the thread key and the keys of the
    /// messages currently in the thread, so a thread move and a message move
    /// on the same message share a key.
    ///
    /// Thread membership is read when the task is queued. A message that
    /// joins the thread afterwards is still moved by `perform_local`, but
    /// without holding its key, so ordering against other tasks on that
    /// message is not guaranteed.
    pub(crate) fn conflict_keys(&self, store: &dyn MailStore) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();

        for thread_id in &self.thread_ids {
            keys.insert(format!("thread:{thread_id}"));
            match store.get_message_ids_for_thread(thread_id) {
                Ok(ids) => keys.extend(ids.iter().map(|id| format!("message:{id}"))),
                Err(e) => warn!("Could not expand thread {} for conflict keys: {:#}", thread_id, e),
            }
        }
        keys.extend(self.message_ids.iter().map(|id| format!("message:{id}")));

        keys
    }
}

/// Ids must be non-empty and unique within their list
fn check_ids<'a>(kind: &str, ids: impl Iterator<Item = &'a str>) -> Result<(), TaskError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(TaskError::InvalidTask(format!("empty {kind} id")));
        }
        if !seen.insert(id) {
            return Err(TaskError::InvalidTask(format!("duplicate {kind} id {id}")));
        }
    }
    Ok(())
}
