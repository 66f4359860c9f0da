//! Handoff to the remote sync process
//!
//! The queue only ever sends on this channel. Whatever consumes the receiver
//! (the sync agent, or a stand-in) owns delivery, retries and errors.

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::models::AccountId;
use crate::tasks::TaskId;

/// A request for the sync process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    /// A task was applied locally; push the account's pending work now
    SyncMailNow { account_id: AccountId, task_id: TaskId },
}

/// Sending half of the sync channel
#[derive(Debug, Clone)]
pub struct SyncBridge {
    tx: mpsc::UnboundedSender<SyncRequest>,
}

impl SyncBridge {
    /// Create a bridge and the receiver the sync agent listens on
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Fire-and-forget notification; a closed channel is logged, not retried
    pub fn send_sync_mail_now(&self, account_id: &AccountId, task_id: &TaskId) {
        let request = SyncRequest::SyncMailNow {
            account_id: account_id.clone(),
            task_id: task_id.clone(),
        };
        match self.tx.send(request) {
            Ok(()) => debug!("Requested sync for account {} (task {})", account_id, task_id),
            Err(_) => warn!(
                "Sync agent is not listening; task {} waits for the next sync",
                task_id
            ),
        }
    }
}
