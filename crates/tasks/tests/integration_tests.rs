//! Integration tests for the tasks crate
//!
//! These tests drive the whole flow against a SQLite store on disk: guard,
//! queue, local apply, handoff, acknowledgement and restart.

use std::sync::Arc;

use chrono::Utc;
use tasks::models::{Folder, FolderId, FolderRole, Message, MessageId, Thread, ThreadId};
use tasks::queue::{SyncBridge, SyncRequest, TaskQueue};
use tasks::storage::{MailStore, SqliteMailStore, TaskRecord};
use tasks::tasks::{ChangeFolderTask, Task, TaskStatus};
use tasks::{ActionHandler, QueueConfig, StoreCategories, TrashOutcome};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn seed(store: &dyn MailStore) {
    store
        .upsert_folder(Folder::new("inbox", "acc1", "Inbox").with_role(FolderRole::Inbox))
        .unwrap();
    store
        .upsert_folder(Folder::new("trash", "acc1", "Trash").with_role(FolderRole::Trash))
        .unwrap();
    store
        .upsert_thread(Thread::new("t1", "acc1", "Quarterly report", Utc::now()))
        .unwrap();
    for id in ["m1", "m2"] {
        store
            .upsert_message(
                Message::builder(id, "t1", "acc1")
                    .folder("inbox")
                    .subject("Quarterly report")
                    .build(),
            )
            .unwrap();
    }
}

fn open(dir: &TempDir) -> Arc<SqliteMailStore> {
    Arc::new(SqliteMailStore::new(dir.path().join("mail.db")).unwrap())
}

fn start_queue(store: &Arc<SqliteMailStore>) -> (TaskQueue, mpsc::UnboundedReceiver<SyncRequest>) {
    let (bridge, rx) = SyncBridge::channel();
    let queue = TaskQueue::new(store.clone(), bridge, &QueueConfig::default()).unwrap();
    (queue, rx)
}

fn folder_of(store: &dyn MailStore, id: &str) -> Option<FolderId> {
    store
        .get_message(&MessageId::new(id))
        .unwrap()
        .and_then(|m| m.folder_id)
}

#[tokio::test]
async fn test_trash_flow_against_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(store.as_ref());
    let (queue, mut rx) = start_queue(&store);
    let handler = ActionHandler::new(
        store.clone(),
        Arc::new(StoreCategories::new(store.clone())),
        queue.clone(),
    );

    let message = store.get_message(&MessageId::new("m1")).unwrap().unwrap();
    let TrashOutcome::Queued(id) = handler.move_message_to_trash(&message, "Test").await.unwrap() else {
        panic!("trash flow did not queue a task");
    };

    assert_eq!(folder_of(store.as_ref(), "m1"), Some(FolderId::new("trash")));
    assert_eq!(folder_of(store.as_ref(), "m2"), Some(FolderId::new("inbox")));

    let request = rx.try_recv().unwrap();
    assert!(matches!(request, SyncRequest::SyncMailNow { ref task_id, .. } if *task_id == id));

    // What the sync process reads back from the task log
    let record = store.get_task(&id).unwrap().unwrap();
    assert_eq!(record.status, TaskStatus::AwaitingRemote);
    let payload: serde_json::Value = serde_json::from_str(&record.payload).unwrap();
    assert_eq!(payload["__cls"], "ChangeFolderTask");
    assert_eq!(payload["aid"], "acc1");
    assert_eq!(payload["folder"]["id"], "trash");
    assert_eq!(payload["messageIds"], serde_json::json!(["m1"]));
    assert!(payload.get("threadIds").is_none());

    queue.acknowledge_remote(&id, Ok(())).unwrap();
    assert_eq!(store.get_task(&id).unwrap().unwrap().status, TaskStatus::Complete);
    assert!(store.list_unsettled_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn test_task_logged_but_not_applied_is_replayed_after_restart() {
    let dir = TempDir::new().unwrap();
    {
        let store = open(&dir);
        seed(store.as_ref());
        // The process went away right after logging the task
        let trash = store.get_folder(&FolderId::new("trash")).unwrap().unwrap();
        let thread = store.get_thread(&ThreadId::new("t1")).unwrap().unwrap();
        let task: Task = ChangeFolderTask::builder(trash)
            .threads(&[thread])
            .source("Test")
            .build()
            .unwrap()
            .into();
        store.save_task(TaskRecord::queued(&task).unwrap()).unwrap();
    }

    let store = open(&dir);
    let (queue, mut rx) = start_queue(&store);
    assert_eq!(queue.restore().unwrap(), 1);

    let id = store.list_unsettled_tasks().unwrap()[0].id.clone();
    queue.wait_for_perform_local(&id).await.unwrap();

    assert_eq!(folder_of(store.as_ref(), "m1"), Some(FolderId::new("trash")));
    assert_eq!(folder_of(store.as_ref(), "m2"), Some(FolderId::new("trash")));
    assert!(matches!(rx.try_recv(), Ok(SyncRequest::SyncMailNow { task_id, .. }) if task_id == id));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_applied_task_is_not_applied_or_announced_twice() {
    let dir = TempDir::new().unwrap();
    let id = {
        let store = open(&dir);
        seed(store.as_ref());
        let (queue, mut rx) = start_queue(&store);

        let message = store.get_message(&MessageId::new("m2")).unwrap().unwrap();
        let task = ChangeFolderTask::builder(store.get_folder(&FolderId::new("trash")).unwrap().unwrap())
            .messages(&[message])
            .source("Test")
            .build()
            .unwrap();
        let id = queue.queue_task(task).unwrap().unwrap();
        queue.wait_for_perform_local(&id).await.unwrap();
        assert!(rx.try_recv().is_ok());
        id
    };

    // Restart while the server has not answered yet
    let store = open(&dir);
    let (queue, mut rx) = start_queue(&store);
    assert_eq!(queue.restore().unwrap(), 1);
    assert_eq!(queue.status(&id), Some(TaskStatus::AwaitingRemote));
    queue.wait_for_perform_local(&id).await.unwrap();
    assert!(rx.try_recv().is_err());

    queue.acknowledge_remote(&id, Ok(())).unwrap();
    assert!(queue.is_empty());

    // Nothing left to reload next time
    let store = open(&dir);
    let (queue, _rx) = start_queue(&store);
    assert_eq!(queue.restore().unwrap(), 0);
    assert_eq!(queue.status(&id), Some(TaskStatus::Complete));
}

#[tokio::test]
async fn test_failed_task_survives_restart_and_can_be_retried() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    seed(store.as_ref());

    let trash = store.get_folder(&FolderId::new("trash")).unwrap().unwrap();
    let message = store.get_message(&MessageId::new("m1")).unwrap().unwrap();
    let task: Task = ChangeFolderTask::builder(trash)
        .messages(&[message])
        .source("Test")
        .build()
        .unwrap()
        .into();
    store.save_task(TaskRecord::queued(&task).unwrap()).unwrap();
    store.update_task_status(task.id(), TaskStatus::Failed).unwrap();

    let (queue, mut rx) = start_queue(&store);
    assert_eq!(queue.restore().unwrap(), 1);
    assert!(queue.wait_for_perform_local(task.id()).await.is_err());
    assert_eq!(folder_of(store.as_ref(), "m1"), Some(FolderId::new("inbox")));

    queue.retry(task.id()).unwrap();
    queue.wait_for_perform_local(task.id()).await.unwrap();
    assert_eq!(folder_of(store.as_ref(), "m1"), Some(FolderId::new("trash")));
    assert!(rx.try_recv().is_ok());
}
