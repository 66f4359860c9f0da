//! taskctl - Command-line front end for the mail task engine
//!
//! Runs user actions through the task queue against the local SQLite store
//! and lets an operator inspect and acknowledge the task log.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use tasks::config::QUEUE_CONFIG_FILE;
use tasks::queue::{SyncBridge, SyncRequest, TaskQueue};
use tasks::storage::{MailStore, SqliteMailStore};
use tasks::{ActionHandler, MessageId, QueueConfig, StoreCategories, TaskId, TrashOutcome};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "taskctl", version, about = "Queue and inspect local-first mail tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Move a message to its account's trash
    Trash {
        message_id: String,
        /// Provenance recorded with the task
        #[arg(long, default_value = "taskctl")]
        source: String,
    },
    /// Print tasks that are not complete, one JSON object per line
    Pending,
    /// Record the server's answer for a task awaiting it
    Ack {
        task_id: String,
        /// Mark the task failed with this reason instead of complete
        #[arg(long)]
        error: Option<String>,
    },
    /// Write the default queue config to the config directory
    InitConfig {
        /// Replace an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    let cli = Cli::parse();
    if let Command::InitConfig { force } = cli.command {
        return init_config(force);
    }

    let settings = QueueConfig::load().context("Failed to load queue config")?;
    let store = open_store(&settings)?;

    if let Command::Pending = cli.command {
        return print_pending(store.as_ref());
    }

    let (bridge, requests) = SyncBridge::channel();
    let sync_agent = tokio::spawn(log_sync_requests(requests));
    let queue = TaskQueue::new(store.clone(), bridge, &settings)?;

    let restored = queue.restore()?;
    if restored > 0 {
        info!("Picked up {} unfinished task(s)", restored);
    }

    match cli.command {
        Command::Trash { message_id, source } => {
            let handler = ActionHandler::new(
                store.clone(),
                Arc::new(StoreCategories::new(store.clone())),
                queue.clone(),
            );
            trash(&handler, store.as_ref(), &message_id, &source).await?;
        }
        Command::Ack { task_id, error } => {
            let id = TaskId::new(task_id);
            let result = error.map_or(Ok(()), Err);
            queue.acknowledge_remote(&id, result)?;
            let status = queue.status(&id).map_or("unknown", |s| s.as_str());
            println!("{id} {status}");
        }
        Command::Pending | Command::InitConfig { .. } => {}
    }

    settle(&queue).await;
    drop(queue);
    if tokio::time::timeout(Duration::from_secs(5), sync_agent).await.is_err() {
        warn!("Sync requests were still pending at exit");
    }
    Ok(())
}

fn init_config(force: bool) -> Result<()> {
    if config::config_exists(QUEUE_CONFIG_FILE) && !force {
        anyhow::bail!("{QUEUE_CONFIG_FILE} already exists; pass --force to replace it");
    }
    let path = QueueConfig::default().save()?;
    println!("wrote {}", path.display());
    Ok(())
}

fn open_store(settings: &QueueConfig) -> Result<Arc<dyn MailStore>> {
    let path = settings
        .database_path()
        .context("Could not determine the data directory")?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let store = SqliteMailStore::new(&path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

async fn trash(handler: &ActionHandler, store: &dyn MailStore, message_id: &str, source: &str) -> Result<()> {
    let message = store
        .get_message(&MessageId::new(message_id))?
        .with_context(|| format!("Message {message_id} not found"))?;

    match handler.move_message_to_trash(&message, source).await? {
        TrashOutcome::Queued(id) => {
            let record = store
                .get_task(&id)?
                .with_context(|| format!("Task {id} missing from the task log"))?;
            println!("queued {id}");
            println!("{}", record.payload);
        }
        TrashOutcome::NoTrashFolder => println!("account {} has no trash folder", message.account_id),
        TrashOutcome::AlreadyInTrash => println!("message {message_id} is already in the trash"),
    }
    Ok(())
}

fn print_pending(store: &dyn MailStore) -> Result<()> {
    for record in store.list_unsettled_tasks()? {
        let task: serde_json::Value = serde_json::from_str(&record.payload)
            .with_context(|| format!("Task {} has a corrupt payload", record.id))?;
        let line = serde_json::json!({
            "id": record.id.as_str(),
            "aid": record.account_id.as_str(),
            "status": record.status.as_str(),
            "queued_at": record.queued_at.to_rfc3339(),
            "task": task,
        });
        println!("{line}");
    }
    Ok(())
}

/// Wait for every tracked task to finish its local apply
async fn settle(queue: &TaskQueue) {
    for (id, _) in queue.tasks() {
        if let Err(e) = queue.wait_for_perform_local(&id).await {
            warn!("Task {} is not applied locally: {}", id, e);
        }
    }
}

/// Stand-in for the sync process: logs what it would push
async fn log_sync_requests(mut requests: mpsc::UnboundedReceiver<SyncRequest>) {
    while let Some(request) = requests.recv().await {
        match request {
            SyncRequest::SyncMailNow { account_id, task_id } => {
                info!("Sync requested for account {} (task {})", account_id, task_id);
            }
        }
    }
}
