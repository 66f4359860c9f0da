//! Errors raised by tasks and the task queue

use super::{TaskId, TaskStatus};

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task's ids or account are inconsistent; raised when a task is
    /// built or decoded, never later at serialization time.
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    #[error("Task {0} is already queued")]
    DuplicateTask(TaskId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The local store mutation could not be committed
    #[error("Local apply failed: {0}")]
    LocalApply(String),

    #[error("Failed to decode task: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("Task queue must be created inside a Tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
