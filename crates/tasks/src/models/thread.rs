//! Thread model representing a conversation

use super::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a thread
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThreadId(pub String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A thread represents a conversation containing one or more messages
///
/// Folder membership is tracked per message; a thread is "in" every folder
/// one of its messages is in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub account_id: AccountId,
    /// Subject line of the thread
    pub subject: String,
    /// Timestamp of the most recent message in the thread
    pub last_message_at: DateTime<Utc>,
}

impl Thread {
    /// Create a new thread with the given properties
    pub fn new(
        id: impl Into<ThreadId>,
        account_id: impl Into<AccountId>,
        subject: impl Into<String>,
        last_message_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            subject: subject.into(),
            last_message_at,
        }
    }
}
