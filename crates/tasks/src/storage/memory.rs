//! In-memory storage implementation
//!
//! Used by tests and as a scratch store; nothing survives the process.

use anyhow::{Result, bail};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{MailStore, TaskRecord};
use crate::models::{AccountId, Folder, FolderId, Message, MessageId, Thread, ThreadId};
use crate::tasks::{TaskId, TaskStatus};

/// In-memory implementation of MailStore
///
/// Uses HashMaps protected by RwLocks for thread-safe access.
pub struct InMemoryMailStore {
    folders: RwLock<HashMap<String, Folder>>,
    threads: RwLock<HashMap<String, Thread>>,
    messages: RwLock<HashMap<String, Message>>,
    thread_messages: RwLock<HashMap<String, HashSet<String>>>,
    /// Task log in insertion order
    tasks: RwLock<Vec<TaskRecord>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            folders: RwLock::new(HashMap::new()),
            threads: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            thread_messages: RwLock::new(HashMap::new()),
            tasks: RwLock::new(Vec::new()),
        }
    }

    fn sorted_by_received(mut messages: Vec<Message>) -> Vec<Message> {
        messages.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then_with(|| a.id.as_str().cmp(b.id.as_str()))
        });
        messages
    }
}

impl Default for InMemoryMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailStore for InMemoryMailStore {
    fn upsert_folder(&self, folder: Folder) -> Result<()> {
        write(&self.folders).insert(folder.id.0.clone(), folder);
        Ok(())
    }

    fn get_folder(&self, id: &FolderId) -> Result<Option<Folder>> {
        Ok(read(&self.folders).get(&id.0).cloned())
    }

    fn list_folders(&self, account_id: &AccountId) -> Result<Vec<Folder>> {
        let mut folders: Vec<Folder> = read(&self.folders)
            .values()
            .filter(|f| &f.account_id == account_id)
            .cloned()
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    fn upsert_thread(&self, thread: Thread) -> Result<()> {
        write(&self.threads).insert(thread.id.0.clone(), thread);
        Ok(())
    }

    fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        Ok(read(&self.threads).get(&id.0).cloned())
    }

    fn upsert_message(&self, message: Message) -> Result<()> {
        let thread_id = message.thread_id.0.clone();
        let msg_id = message.id.0.clone();

        let previous = write(&self.messages).insert(msg_id.clone(), message);

        let mut thread_messages = write(&self.thread_messages);
        // A message that changed threads must leave the old one
        if let Some(previous) = previous
            && previous.thread_id.0 != thread_id
            && let Some(ids) = thread_messages.get_mut(&previous.thread_id.0)
        {
            ids.remove(&msg_id);
        }
        thread_messages.entry(thread_id).or_default().insert(msg_id);

        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(read(&self.messages).get(&id.0).cloned())
    }

    fn get_message_ids_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<MessageId>> {
        let thread_messages = read(&self.thread_messages);
        let messages = read(&self.messages);

        let in_thread: Vec<Message> = thread_messages
            .get(&thread_id.0)
            .map(|ids| ids.iter().filter_map(|id| messages.get(id).cloned()).collect())
            .unwrap_or_default();

        Ok(Self::sorted_by_received(in_thread)
            .into_iter()
            .map(|m| m.id)
            .collect())
    }

    fn list_messages_in_folder(&self, folder_id: &FolderId) -> Result<Vec<Message>> {
        let in_folder: Vec<Message> = read(&self.messages)
            .values()
            .filter(|m| m.folder_id.as_ref() == Some(folder_id))
            .cloned()
            .collect();
        Ok(Self::sorted_by_received(in_folder))
    }

    fn set_message_folder(&self, id: &MessageId, folder_id: &FolderId) -> Result<()> {
        if let Some(message) = write(&self.messages).get_mut(&id.0) {
            message.folder_id = Some(folder_id.clone());
        }
        Ok(())
    }

    fn save_task(&self, record: TaskRecord) -> Result<()> {
        let mut tasks = write(&self.tasks);
        match tasks.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => tasks.push(record),
        }
        Ok(())
    }

    fn get_task(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
        Ok(read(&self.tasks).iter().find(|r| &r.id == id).cloned())
    }

    fn update_task_status(&self, id: &TaskId, status: TaskStatus) -> Result<()> {
        let mut tasks = write(&self.tasks);
        let Some(record) = tasks.iter_mut().find(|r| &r.id == id) else {
            bail!("Task {id} not found in task log");
        };
        record.status = status;
        Ok(())
    }

    fn list_unsettled_tasks(&self) -> Result<Vec<TaskRecord>> {
        Ok(read(&self.tasks)
            .iter()
            .filter(|r| r.status != TaskStatus::Complete)
            .cloned()
            .collect())
    }

    fn clear(&self) -> Result<()> {
        write(&self.folders).clear();
        write(&self.threads).clear();
        write(&self.messages).clear();
        write(&self.thread_messages).clear();
        write(&self.tasks).clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FolderRole;
    use crate::tasks::{ChangeFolderTask, Task};
    use chrono::{Duration, Utc};

    fn make_test_message(id: &str, thread_id: &str, folder: &str, age_minutes: i64) -> Message {
        Message::builder(id, thread_id, "acc1")
            .folder(folder)
            .subject(format!("Subject {id}"))
            .received_at(Utc::now() - Duration::minutes(age_minutes))
            .build()
    }

    fn make_record(message_id: &str) -> TaskRecord {
        let trash = Folder::new("trash", "acc1", "Trash").with_role(FolderRole::Trash);
        let message = make_test_message(message_id, "t1", "inbox", 0);
        let task: Task = ChangeFolderTask::builder(trash)
            .messages(&[message])
            .source("Test")
            .build()
            .unwrap()
            .into();
        TaskRecord::queued(&task).unwrap()
    }

    #[test]
    fn test_folder_crud_and_role_lookup() {
        let store = InMemoryMailStore::new();
        store.upsert_folder(Folder::new("inbox", "acc1", "Inbox").with_role(FolderRole::Inbox)).unwrap();
        store.upsert_folder(Folder::new("trash", "acc1", "Trash").with_role(FolderRole::Trash)).unwrap();
        store.upsert_folder(Folder::new("trash2", "acc2", "Trash").with_role(FolderRole::Trash)).unwrap();

        let folders = store.list_folders(&AccountId::new("acc1")).unwrap();
        assert_eq!(folders.len(), 2);

        let trash = store
            .find_folder_by_role(&AccountId::new("acc1"), FolderRole::Trash)
            .unwrap()
            .unwrap();
        assert_eq!(trash.id.as_str(), "trash");

        assert!(store
            .find_folder_by_role(&AccountId::new("acc1"), FolderRole::Spam)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_message_ids_for_thread_ordered_by_received() {
        let store = InMemoryMailStore::new();
        store.upsert_message(make_test_message("m1", "t1", "inbox", 1)).unwrap();
        store.upsert_message(make_test_message("m2", "t1", "inbox", 10)).unwrap();
        store.upsert_message(make_test_message("m3", "t2", "inbox", 5)).unwrap();

        let ids = store.get_message_ids_for_thread(&ThreadId::new("t1")).unwrap();
        assert_eq!(ids, vec![MessageId::new("m2"), MessageId::new("m1")]);
    }

    #[test]
    fn test_message_moving_threads_leaves_old_thread() {
        let store = InMemoryMailStore::new();
        store.upsert_message(make_test_message("m1", "t1", "inbox", 0)).unwrap();
        store.upsert_message(make_test_message("m1", "t2", "inbox", 0)).unwrap();

        assert!(store.get_message_ids_for_thread(&ThreadId::new("t1")).unwrap().is_empty());
        assert_eq!(store.get_message_ids_for_thread(&ThreadId::new("t2")).unwrap().len(), 1);
    }

    #[test]
    fn test_set_message_folder() {
        let store = InMemoryMailStore::new();
        store.upsert_message(make_test_message("m1", "t1", "inbox", 0)).unwrap();

        store.set_message_folder(&MessageId::new("m1"), &FolderId::new("trash")).unwrap();
        // Unknown messages are ignored
        store.set_message_folder(&MessageId::new("nope"), &FolderId::new("trash")).unwrap();

        let in_trash = store.list_messages_in_folder(&FolderId::new("trash")).unwrap();
        assert_eq!(in_trash.len(), 1);
        assert!(store.list_messages_in_folder(&FolderId::new("inbox")).unwrap().is_empty());
    }

    #[test]
    fn test_task_log_keeps_queue_order_and_hides_complete() {
        let store = InMemoryMailStore::new();
        let first = make_record("m1");
        let second = make_record("m2");
        store.save_task(first.clone()).unwrap();
        store.save_task(second.clone()).unwrap();

        let unsettled = store.list_unsettled_tasks().unwrap();
        assert_eq!(unsettled, vec![first.clone(), second.clone()]);

        store.update_task_status(&first.id, TaskStatus::Complete).unwrap();
        let unsettled = store.list_unsettled_tasks().unwrap();
        assert_eq!(unsettled, vec![second]);

        let completed = store.get_task(&first.id).unwrap().unwrap();
        assert_eq!(completed.status, TaskStatus::Complete);
        assert!(store.update_task_status(&TaskId::new("missing"), TaskStatus::Failed).is_err());
    }

    #[test]
    fn test_clear() {
        let store = InMemoryMailStore::new();
        store.upsert_thread(Thread::new("t1", "acc1", "Test", Utc::now())).unwrap();
        store.upsert_message(make_test_message("m1", "t1", "inbox", 0)).unwrap();
        store.save_task(make_record("m1")).unwrap();

        store.clear().unwrap();

        assert!(store.get_thread(&ThreadId::new("t1")).unwrap().is_none());
        assert!(store.get_message(&MessageId::new("m1")).unwrap().is_none());
        assert!(store.list_unsettled_tasks().unwrap().is_empty());
    }
}
