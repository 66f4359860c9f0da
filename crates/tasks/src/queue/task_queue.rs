//! The task queue
//!
//! Accepts tasks, records them in the task log, applies them to the local
//! store and then hands them to the sync process. Each accepted task gets
//! its own tokio task: it waits for earlier tasks touching the same
//! entities, takes a concurrency permit and runs the local apply on the
//! blocking pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info, warn};
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, watch};

use super::bridge::SyncBridge;
use super::conflicts::{ApplySlot, ConflictChains, Predecessors};
use crate::config::QueueConfig;
use crate::storage::{MailStore, TaskRecord};
use crate::tasks::{Task, TaskError, TaskId, TaskStatus};

/// How a task's local apply ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalOutcome {
    /// The local store was updated; `changed` entities were written
    Applied { changed: usize },
    Failed(String),
}

struct TaskEntry {
    task: Task,
    status: TaskStatus,
    /// Notify the sync process even when the apply changed nothing
    ///
    /// Set for tasks reloaded from the task log and for retries, whose
    /// earlier attempts may already have written the local store.
    always_notify: bool,
    performed: watch::Sender<Option<LocalOutcome>>,
}

impl TaskEntry {
    fn new(task: Task, status: TaskStatus, always_notify: bool, outcome: Option<LocalOutcome>) -> Self {
        Self {
            task,
            status,
            always_notify,
            performed: watch::Sender::new(outcome),
        }
    }
}

#[derive(Default)]
struct QueueState {
    /// Tasks the queue still has work or answers for
    entries: HashMap<TaskId, TaskEntry>,
    chains: ConflictChains,
}

struct Inner {
    store: Arc<dyn MailStore>,
    bridge: SyncBridge,
    runtime: Handle,
    permits: Arc<Semaphore>,
    state: Mutex<QueueState>,
}

/// Handle to the task queue; clones share the same queue
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Inner>,
}

impl TaskQueue {
    /// Create a queue bound to the current tokio runtime
    pub fn new(
        store: Arc<dyn MailStore>,
        bridge: SyncBridge,
        config: &QueueConfig,
    ) -> Result<Self, TaskError> {
        let runtime = Handle::try_current()?;
        let permits = config.max_concurrent_local.max(1);
        debug!("Task queue allows {} concurrent local applies", permits);

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                bridge,
                runtime,
                permits: Arc::new(Semaphore::new(permits)),
                state: Mutex::new(QueueState::default()),
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store(&self) -> &dyn MailStore {
        self.inner.store.as_ref()
    }

    /// Accept a task
    ///
    /// Returns the task id, or `None` when the task targets nothing and was
    /// dropped. The task is in the task log before this returns; its local
    /// apply runs in the background.
    pub fn queue_task(&self, task: impl Into<Task>) -> Result<Option<TaskId>, TaskError> {
        let task = task.into();
        task.validate()?;

        if task.is_empty() {
            debug!(
                "Dropping {} from {:?}: no threads or messages",
                task.class_name(),
                task.source()
            );
            return Ok(None);
        }

        let id = task.id().clone();
        let keys = task.conflict_keys(self.store());

        // Claiming under the lock keeps chain order equal to enqueue order
        let (predecessors, slot) = {
            let mut state = self.state();
            if state.entries.contains_key(&id) || self.store().get_task(&id)?.is_some() {
                return Err(TaskError::DuplicateTask(id));
            }
            self.store().save_task(TaskRecord::queued(&task)?)?;

            let claimed = state.chains.claim(&keys);
            state
                .entries
                .insert(id.clone(), TaskEntry::new(task.clone(), TaskStatus::Queued, false, None));
            claimed
        };

        info!(
            "Queued {} {} for account {} from {:?}",
            task.class_name(),
            id,
            task.account_id(),
            task.source()
        );
        if !predecessors.is_empty() {
            debug!("Task {} waits for earlier tasks on the same entities", id);
        }

        self.spawn_apply(task, predecessors, slot);
        Ok(Some(id))
    }

    /// Resolve once the task's local apply has finished
    ///
    /// Succeeds as soon as the local store reflects the task, whatever the
    /// remote side does later. Fails with [`TaskError::LocalApply`] when the
    /// apply failed.
    pub async fn wait_for_perform_local(&self, id: &TaskId) -> Result<(), TaskError> {
        let receiver = self.state().entries.get(id).map(|entry| entry.performed.subscribe());
        let Some(mut receiver) = receiver else {
            return self.performed_from_log(id);
        };

        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map(|seen| (*seen).clone())
            .ok()
            .flatten();

        match outcome {
            Some(LocalOutcome::Applied { .. }) => Ok(()),
            Some(LocalOutcome::Failed(reason)) => Err(TaskError::LocalApply(reason)),
            None => self.performed_from_log(id),
        }
    }

    fn performed_from_log(&self, id: &TaskId) -> Result<(), TaskError> {
        match self.store().get_task(id)? {
            Some(record) if record.status.is_locally_applied() => Ok(()),
            Some(record) if record.status == TaskStatus::Failed => Err(TaskError::LocalApply(
                format!("task {id} failed before it could be applied"),
            )),
            _ => Err(TaskError::UnknownTask(id.clone())),
        }
    }

    /// Current status of a task, from the queue or else the task log
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        if let Some(entry) = self.state().entries.get(id) {
            return Some(entry.status);
        }
        match self.store().get_task(id) {
            Ok(record) => record.map(|r| r.status),
            Err(e) => {
                warn!("Failed to read task {} from the task log: {:#}", id, e);
                None
            }
        }
    }

    /// A task the queue is still tracking
    pub fn task(&self, id: &TaskId) -> Option<Task> {
        self.state().entries.get(id).map(|entry| entry.task.clone())
    }

    /// Tracked tasks with their status, in no particular order
    pub fn tasks(&self) -> Vec<(TaskId, TaskStatus)> {
        self.state()
            .entries
            .iter()
            .map(|(id, entry)| (id.clone(), entry.status))
            .collect()
    }

    /// Number of tasks the queue is tracking
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record the sync process's answer for a task awaiting the server
    ///
    /// Success completes the task and drops it from the queue. Failure marks
    /// it Failed; the local change stays and [`TaskQueue::retry`] resends it.
    ///
    /// Only tasks in AwaitingRemote can be acknowledged; the sync process
    /// cannot have heard of anything else.
    pub fn acknowledge_remote(&self, id: &TaskId, result: Result<(), String>) -> Result<(), TaskError> {
        let next = match &result {
            Ok(()) => TaskStatus::Complete,
            Err(_) => TaskStatus::Failed,
        };

        {
            let mut state = self.state();
            let entry = state
                .entries
                .get_mut(id)
                .ok_or_else(|| TaskError::UnknownTask(id.clone()))?;
            if entry.status != TaskStatus::AwaitingRemote {
                return Err(TaskError::InvalidTransition {
                    id: id.clone(),
                    from: entry.status,
                    to: next,
                });
            }
            advance_entry(self.store(), id, entry, next)?;
        }

        match result {
            Ok(()) => {
                info!("Server accepted task {}", id);
                self.evict(id);
            }
            Err(reason) => warn!("Server rejected task {}: {}", id, reason),
        }
        Ok(())
    }

    /// Put a failed task back in the queue
    pub fn retry(&self, id: &TaskId) -> Result<(), TaskError> {
        let task = self
            .task(id)
            .ok_or_else(|| TaskError::UnknownTask(id.clone()))?;
        let keys = task.conflict_keys(self.store());

        let (predecessors, slot) = {
            let mut state = self.state();
            let QueueState { entries, chains } = &mut *state;
            let entry = entries
                .get_mut(id)
                .ok_or_else(|| TaskError::UnknownTask(id.clone()))?;

            advance_entry(self.store(), id, entry, TaskStatus::Queued)?;
            entry.always_notify = true;
            entry.performed = watch::Sender::new(None);
            chains.claim(&keys)
        };

        info!("Retrying task {}", id);
        self.spawn_apply(task, predecessors, slot);
        Ok(())
    }

    /// Reload unsettled tasks from the task log after a restart
    ///
    /// Queued tasks are applied again (their apply is idempotent) and the
    /// sync process is notified for them. Tasks that were applied but never
    /// handed over are handed over now. Returns how many tasks were reloaded.
    pub fn restore(&self) -> Result<usize, TaskError> {
        let records = self.store().list_unsettled_tasks()?;
        let mut restored = 0;

        for record in records {
            if self.state().entries.contains_key(&record.id) {
                continue;
            }
            let task = match record.task() {
                Ok(task) => task,
                Err(e) => {
                    error!("Skipping task {} from the task log: {}", record.id, e);
                    continue;
                }
            };
            let id = record.id.clone();

            match record.status {
                TaskStatus::Queued => {
                    let keys = task.conflict_keys(self.store());
                    let (predecessors, slot) = {
                        let mut state = self.state();
                        let claimed = state.chains.claim(&keys);
                        state
                            .entries
                            .insert(id.clone(), TaskEntry::new(task.clone(), TaskStatus::Queued, true, None));
                        claimed
                    };
                    self.spawn_apply(task, predecessors, slot);
                }
                TaskStatus::LocalApplied => {
                    self.track(task.clone(), TaskStatus::LocalApplied, Some(LocalOutcome::Applied { changed: 0 }));
                    self.inner.bridge.send_sync_mail_now(task.account_id(), &id);
                    self.advance(&id, TaskStatus::AwaitingRemote)?;
                }
                TaskStatus::AwaitingRemote => {
                    self.track(task, TaskStatus::AwaitingRemote, Some(LocalOutcome::Applied { changed: 0 }));
                }
                TaskStatus::Failed => {
                    let reason = format!("task {id} had failed before the restart");
                    self.track(task, TaskStatus::Failed, Some(LocalOutcome::Failed(reason)));
                }
                TaskStatus::Complete => continue,
            }
            restored += 1;
        }

        if restored > 0 {
            info!("Restored {} task(s) from the task log", restored);
        }
        Ok(restored)
    }

    fn track(&self, task: Task, status: TaskStatus, outcome: Option<LocalOutcome>) {
        let id = task.id().clone();
        self.state()
            .entries
            .insert(id, TaskEntry::new(task, status, true, outcome));
    }

    fn spawn_apply(&self, task: Task, predecessors: Predecessors, slot: ApplySlot) {
        let queue = self.clone();
        self.inner.runtime.spawn(async move {
            queue.run_local(task, predecessors, slot).await;
        });
    }

    async fn run_local(self, task: Task, predecessors: Predecessors, slot: ApplySlot) {
        let id = task.id().clone();
        predecessors.wait().await;

        let result = {
            // The semaphore is never closed
            let _permit = self.inner.permits.acquire().await.ok();
            let store = Arc::clone(&self.inner.store);
            let job = task.clone();
            tokio::task::spawn_blocking(move || job.perform_local(store.as_ref())).await
        };

        match result {
            Ok(Ok(changed)) => self.finish_applied(&task, changed),
            Ok(Err(e)) => self.finish_failed(&id, format!("{e:#}")),
            Err(e) => self.finish_failed(&id, format!("local apply aborted: {e}")),
        }

        drop(slot);
    }

    fn finish_applied(&self, task: &Task, changed: usize) {
        let id = task.id();
        if let Err(e) = self.advance(id, TaskStatus::LocalApplied) {
            // The store already reflects the task; waiters still get an answer
            error!("Task {} applied but could not be marked: {}", id, e);
            self.publish(id, LocalOutcome::Applied { changed });
            return;
        }

        let always_notify = self
            .state()
            .entries
            .get(id)
            .is_some_and(|entry| entry.always_notify);

        if changed == 0 && !always_notify {
            // Nothing changed, so there is nothing for the server to do
            debug!("Task {} changed nothing locally; completing without sync", id);
            let completed = self.advance(id, TaskStatus::Complete);
            self.publish(id, LocalOutcome::Applied { changed });
            if completed.is_ok() {
                self.evict(id);
            }
            return;
        }

        self.inner.bridge.send_sync_mail_now(task.account_id(), id);
        if let Err(e) = self.advance(id, TaskStatus::AwaitingRemote) {
            warn!("Task {} could not be marked as awaiting the server: {}", id, e);
        }
        self.publish(id, LocalOutcome::Applied { changed });
    }

    fn finish_failed(&self, id: &TaskId, reason: String) {
        error!("Local apply of task {} failed: {}", id, reason);
        if let Err(e) = self.advance(id, TaskStatus::Failed) {
            warn!("Task {} could not be marked failed: {}", id, e);
        }
        self.publish(id, LocalOutcome::Failed(reason));
    }

    fn publish(&self, id: &TaskId, outcome: LocalOutcome) {
        if let Some(entry) = self.state().entries.get(id) {
            entry.performed.send_replace(Some(outcome));
        }
    }

    fn advance(&self, id: &TaskId, next: TaskStatus) -> Result<(), TaskError> {
        let mut state = self.state();
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| TaskError::UnknownTask(id.clone()))?;
        advance_entry(self.store(), id, entry, next)
    }

    fn evict(&self, id: &TaskId) {
        if self.state().entries.remove(id).is_some() {
            debug!("Task {} settled and left the queue", id);
        }
    }
}

/// Move an entry to `next` and mirror it in the task log
fn advance_entry(
    store: &dyn MailStore,
    id: &TaskId,
    entry: &mut TaskEntry,
    next: TaskStatus,
) -> Result<(), TaskError> {
    if !entry.status.can_advance_to(next) {
        return Err(TaskError::InvalidTransition {
            id: id.clone(),
            from: entry.status,
            to: next,
        });
    }

    entry.status = next;
    debug!("Task {} is now {}", id, next);
    if let Err(e) = store.update_task_status(id, next) {
        warn!("Failed to record status {} for task {}: {:#}", next, id, e);
    }
    Ok(())
}
