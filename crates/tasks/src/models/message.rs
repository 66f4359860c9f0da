//! Message model

use super::{AccountId, Folder, FolderId, ThreadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single email message within a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// ID of the thread this message belongs to
    pub thread_id: ThreadId,
    pub account_id: AccountId,
    /// Folder the message currently lives in, if known
    pub folder_id: Option<FolderId>,
    pub subject: String,
    /// When the message was received
    pub received_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message builder
    pub fn builder(
        id: impl Into<MessageId>,
        thread_id: impl Into<ThreadId>,
        account_id: impl Into<AccountId>,
    ) -> MessageBuilder {
        MessageBuilder::new(id.into(), thread_id.into(), account_id.into())
    }

    /// Whether the message already resides in `folder`
    pub fn is_in_folder(&self, folder: &Folder) -> bool {
        self.folder_id.as_ref() == Some(&folder.id)
    }
}

/// Builder for creating Message instances
pub struct MessageBuilder {
    id: MessageId,
    thread_id: ThreadId,
    account_id: AccountId,
    folder_id: Option<FolderId>,
    subject: String,
    received_at: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    fn new(id: MessageId, thread_id: ThreadId, account_id: AccountId) -> Self {
        Self {
            id,
            thread_id,
            account_id,
            folder_id: None,
            subject: String::new(),
            received_at: None,
        }
    }

    pub fn folder(mut self, folder_id: impl Into<FolderId>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            thread_id: self.thread_id,
            account_id: self.account_id,
            folder_id: self.folder_id,
            subject: self.subject,
            received_at: self.received_at.unwrap_or_else(Utc::now),
        }
    }
}
