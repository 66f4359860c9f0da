//! Email actions module
//!
//! Call-site handlers that decide whether a user action is worth a task
//! before handing it to the queue.

mod handler;

pub use handler::{ActionHandler, CategoryLookup, StoreCategories, TrashOutcome};
