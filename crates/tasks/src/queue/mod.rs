//! Task queue and its handoff to the sync process

mod bridge;
mod conflicts;
mod task_queue;

pub use bridge::{SyncBridge, SyncRequest};
pub use task_queue::{LocalOutcome, TaskQueue};
