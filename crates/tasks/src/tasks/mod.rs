//! Task model
//!
//! A task is a persisted, retryable unit of intended mutation. Tasks are
//! applied to the local store first and replayed against the remote server
//! later by the sync process, which reads their serialized form.

mod change_folder;
mod change_mail;
mod error;
mod task;

pub use change_folder::{ChangeFolderTask, ChangeFolderTaskBuilder};
pub use change_mail::{ChangeMailTask, needs_move};
pub use error::TaskError;
pub use task::{Task, TaskId, TaskStatus};
