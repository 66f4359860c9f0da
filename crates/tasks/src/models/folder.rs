//! Folder model: the destination of folder-change tasks

use super::AccountId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a folder
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FolderId(pub String);

impl FolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FolderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for FolderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Well-known folder roles
///
/// A folder without a role is a user folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FolderRole {
    Inbox,
    Sent,
    Drafts,
    Archive,
    Spam,
    Trash,
    All,
}

impl FolderRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            FolderRole::Inbox => "inbox",
            FolderRole::Sent => "sent",
            FolderRole::Drafts => "drafts",
            FolderRole::Archive => "archive",
            FolderRole::Spam => "spam",
            FolderRole::Trash => "trash",
            FolderRole::All => "all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbox" => Some(FolderRole::Inbox),
            "sent" => Some(FolderRole::Sent),
            "drafts" => Some(FolderRole::Drafts),
            "archive" => Some(FolderRole::Archive),
            "spam" => Some(FolderRole::Spam),
            "trash" => Some(FolderRole::Trash),
            "all" => Some(FolderRole::All),
            _ => None,
        }
    }
}

impl fmt::Display for FolderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mail folder
///
/// This is also the `folder` object of a serialized task, so the field
/// names below are part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    pub id: FolderId,
    /// Owning account
    #[serde(rename = "aid")]
    pub account_id: AccountId,
    /// Display name / path
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<FolderRole>,
}

impl Folder {
    /// Create a user folder (no role)
    pub fn new(
        id: impl Into<FolderId>,
        account_id: impl Into<AccountId>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            account_id: account_id.into(),
            name: name.into(),
            role: None,
        }
    }

    /// Builder method to set the folder role
    pub fn with_role(mut self, role: FolderRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn has_role(&self, role: FolderRole) -> bool {
        self.role == Some(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_matches_as_str() {
        for role in [
            FolderRole::Inbox,
            FolderRole::Sent,
            FolderRole::Drafts,
            FolderRole::Archive,
            FolderRole::Spam,
            FolderRole::Trash,
            FolderRole::All,
        ] {
            assert_eq!(FolderRole::parse(role.as_str()), Some(role));
        }
        assert_eq!(FolderRole::parse("Label_7"), None);
    }

    #[test]
    fn test_folder_json_shape() {
        let trash = Folder::new("trash", "acc1", "Trash").with_role(FolderRole::Trash);
        let json = serde_json::to_value(&trash).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "trash", "aid": "acc1", "name": "Trash", "role": "trash"})
        );
    }

    #[test]
    fn test_user_folder_omits_role() {
        let folder = Folder::new("f1", "acc1", "Receipts");
        let json = serde_json::to_value(&folder).unwrap();
        assert!(json.get("role").is_none());
        assert!(!folder.has_role(FolderRole::Trash));
    }
}
