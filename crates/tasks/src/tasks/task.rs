//! Task identity, lifecycle and the closed set of task kinds

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::{ChangeFolderTask, TaskError};
use crate::models::AccountId;
use crate::storage::MailStore;

/// Unique identifier for a task (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle of a task, advanced only by the task queue
///
/// ```text
/// Queued -> LocalApplied -> AwaitingRemote -> Complete
///    \-> Failed -(retry)-> Queued
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    LocalApplied,
    AwaitingRemote,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::LocalApplied => "local_applied",
            TaskStatus::AwaitingRemote => "awaiting_remote",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        }
    }

    /// Complete and Failed end the queue's work on a task
    pub fn is_settled(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }

    /// Whether the local apply has already happened
    pub fn is_locally_applied(&self) -> bool {
        matches!(
            self,
            TaskStatus::LocalApplied | TaskStatus::AwaitingRemote | TaskStatus::Complete
        )
    }

    /// Forward-only transitions, plus the explicit Failed -> Queued retry
    pub fn can_advance_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Queued, LocalApplied)
                | (Queued, Failed)
                | (LocalApplied, AwaitingRemote)
                | (LocalApplied, Complete)
                | (AwaitingRemote, Complete)
                | (AwaitingRemote, Failed)
                | (Failed, Queued)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(TaskStatus::Queued),
            "local_applied" => Ok(TaskStatus::LocalApplied),
            "awaiting_remote" => Ok(TaskStatus::AwaitingRemote),
            "complete" => Ok(TaskStatus::Complete),
            "failed" => Ok(TaskStatus::Failed),
            other => anyhow::bail!("Unknown task status: {other}"),
        }
    }
}

/// Every kind of task the engine knows how to run
///
/// The `__cls` key of the serialized form selects the variant. Decoding an
/// unknown discriminator fails instead of producing a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__cls")]
pub enum Task {
    #[serde(rename = "ChangeFolderTask")]
    ChangeFolder(ChangeFolderTask),
}

impl Task {
    pub fn id(&self) -> &TaskId {
        match self {
            Task::ChangeFolder(task) => task.id(),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        match self {
            Task::ChangeFolder(task) => task.account_id(),
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Task::ChangeFolder(task) => task.source(),
        }
    }

    /// The serialized discriminator of this task
    pub fn class_name(&self) -> &'static str {
        match self {
            Task::ChangeFolder(_) => "ChangeFolderTask",
        }
    }

    /// True when the task targets nothing at all
    pub fn is_empty(&self) -> bool {
        match self {
            Task::ChangeFolder(task) => task.is_empty(),
        }
    }

    pub fn validate(&self) -> Result<(), TaskError> {
        match self {
            Task::ChangeFolder(task) => task.validate(),
        }
    }

    /// Replace the id, used when a task is reloaded from the task log
    pub fn with_id(mut self, id: TaskId) -> Self {
        match &mut self {
            Task::ChangeFolder(task) => task.set_id(id),
        }
        self
    }

    /// Apply the task to the local store; returns how many entities changed
    pub fn perform_local(&self, store: &dyn MailStore) -> Result<usize> {
        match self {
            Task::ChangeFolder(task) => task.perform_local(store),
        }
    }

    pub(crate) fn conflict_keys(&self, store: &dyn MailStore) -> BTreeSet<String> {
        match self {
            Task::ChangeFolder(task) => task.conflict_keys(store),
        }
    }

    /// Canonical serialized form consumed by the sync process
    pub fn to_json(&self) -> Result<serde_json::Value, TaskError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Decode a serialized task and check its invariants
    ///
    /// The decoded task gets a fresh id; use [`Task::with_id`] to restore a
    /// known one.
    pub fn from_json(json: &str) -> Result<Self, TaskError> {
        let task: Task = serde_json::from_str(json)?;
        task.validate()?;
        Ok(task)
    }
}

impl From<ChangeFolderTask> for Task {
    fn from(task: ChangeFolderTask) -> Self {
        Task::ChangeFolder(task)
    }
}
