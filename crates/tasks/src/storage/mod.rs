//! Storage traits and implementations
//!
//! This module defines the local store the task engine writes to, including
//! the durable task log. The trait-based design allows swapping between
//! in-memory and SQLite storage.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMailStore;
pub use sqlite::SqliteMailStore;
pub use traits::{MailStore, TaskRecord};
