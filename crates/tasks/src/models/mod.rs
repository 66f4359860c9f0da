//! Domain models for mail entities

mod account;
mod folder;
mod message;
mod thread;

pub use account::AccountId;
pub use folder::{Folder, FolderId, FolderRole};
pub use message::{Message, MessageBuilder, MessageId};
pub use thread::{Thread, ThreadId};
