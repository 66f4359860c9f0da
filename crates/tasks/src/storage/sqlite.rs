//! SQLite-based mail storage and task log

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{MailStore, TaskRecord};
use crate::models::{AccountId, Folder, FolderId, FolderRole, Message, MessageId, Thread, ThreadId};
use crate::tasks::{TaskId, TaskStatus};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE folders (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                name TEXT NOT NULL,
                role TEXT
            );

            CREATE INDEX idx_folders_account ON folders(account_id, name);

            CREATE TABLE threads (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                subject TEXT NOT NULL,
                last_message_at TEXT NOT NULL
            );

            -- No foreign key to threads: messages may arrive before their thread
            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                account_id TEXT NOT NULL,
                folder_id TEXT,
                subject TEXT NOT NULL,
                received_at TEXT NOT NULL
            );

            CREATE INDEX idx_messages_thread_id ON messages(thread_id, received_at ASC);
            CREATE INDEX idx_messages_folder_id ON messages(folder_id, received_at ASC);

            -- Task log; seq preserves queue order across restarts
            CREATE TABLE tasks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                account_id TEXT NOT NULL,
                status TEXT NOT NULL,
                payload TEXT NOT NULL,
                queued_at TEXT NOT NULL
            );

            CREATE INDEX idx_tasks_status ON tasks(status);
            "#,
        ),
    ])
}

/// SQLite-based mail storage
///
/// A single connection behind a mutex; every call is its own statement or
/// transaction, so writes are durable when the call returns.
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::with_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers proceed while a task apply is writing;
        // synchronous = NORMAL is safe with WAL.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<Folder> {
    let role: Option<String> = row.get(3)?;
    Ok(Folder {
        id: FolderId::new(row.get::<_, String>(0)?),
        account_id: AccountId::new(row.get::<_, String>(1)?),
        name: row.get(2)?,
        role: role.as_deref().and_then(FolderRole::parse),
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let folder_id: Option<String> = row.get(3)?;
    let received_at: String = row.get(5)?;
    Ok(Message {
        id: MessageId::new(row.get::<_, String>(0)?),
        thread_id: ThreadId::new(row.get::<_, String>(1)?),
        account_id: AccountId::new(row.get::<_, String>(2)?),
        folder_id: folder_id.map(FolderId::new),
        subject: row.get(4)?,
        received_at: parse_timestamp(&received_at),
    })
}

const MESSAGE_COLUMNS: &str = "id, thread_id, account_id, folder_id, subject, received_at";

/// Raw task row; the status is parsed outside rusqlite's error type
type TaskRow = (String, String, String, String, String);

fn task_row(row: &Row<'_>) -> rusqlite::Result<TaskRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn record_from_row((id, account_id, status, payload, queued_at): TaskRow) -> Result<TaskRecord> {
    Ok(TaskRecord {
        id: TaskId::new(id),
        account_id: AccountId::new(account_id),
        status: status.parse()?,
        payload,
        queued_at: parse_timestamp(&queued_at),
    })
}

impl MailStore for SqliteMailStore {
    fn upsert_folder(&self, folder: Folder) -> Result<()> {
        self.conn().execute(
            "INSERT INTO folders (id, account_id, name, role)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                name = excluded.name,
                role = excluded.role",
            params![
                folder.id.as_str(),
                folder.account_id.as_str(),
                folder.name,
                folder.role.map(|r| r.as_str()),
            ],
        )?;
        Ok(())
    }

    fn get_folder(&self, id: &FolderId) -> Result<Option<Folder>> {
        let folder = self
            .conn()
            .query_row(
                "SELECT id, account_id, name, role FROM folders WHERE id = ?",
                [id.as_str()],
                folder_from_row,
            )
            .optional()?;
        Ok(folder)
    }

    fn list_folders(&self, account_id: &AccountId) -> Result<Vec<Folder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, account_id, name, role FROM folders
             WHERE account_id = ? ORDER BY name",
        )?;
        let folders = stmt
            .query_map([account_id.as_str()], folder_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(folders)
    }

    fn upsert_thread(&self, thread: Thread) -> Result<()> {
        self.conn().execute(
            "INSERT INTO threads (id, account_id, subject, last_message_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                subject = excluded.subject,
                last_message_at = excluded.last_message_at",
            params![
                thread.id.as_str(),
                thread.account_id.as_str(),
                thread.subject,
                thread.last_message_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>> {
        let row: Option<(String, String, String, String)> = self
            .conn()
            .query_row(
                "SELECT id, account_id, subject, last_message_at FROM threads WHERE id = ?",
                [id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((id, account_id, subject, last_message_at)) = row else {
            return Ok(None);
        };

        Ok(Some(Thread {
            id: ThreadId::new(id),
            account_id: AccountId::new(account_id),
            subject,
            last_message_at: parse_timestamp(&last_message_at),
        }))
    }

    fn upsert_message(&self, message: Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, thread_id, account_id, folder_id, subject, received_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                thread_id = excluded.thread_id,
                account_id = excluded.account_id,
                folder_id = excluded.folder_id,
                subject = excluded.subject,
                received_at = excluded.received_at",
            params![
                message.id.as_str(),
                message.thread_id.as_str(),
                message.account_id.as_str(),
                message.folder_id.as_ref().map(FolderId::as_str),
                message.subject,
                message.received_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?"),
                [id.as_str()],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    fn get_message_ids_for_thread(&self, thread_id: &ThreadId) -> Result<Vec<MessageId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id FROM messages WHERE thread_id = ? ORDER BY received_at ASC, id ASC",
        )?;
        let ids = stmt
            .query_map([thread_id.as_str()], |row| {
                Ok(MessageId::new(row.get::<_, String>(0)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn list_messages_in_folder(&self, folder_id: &FolderId) -> Result<Vec<Message>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE folder_id = ? ORDER BY received_at ASC, id ASC"
        ))?;
        let messages = stmt
            .query_map([folder_id.as_str()], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    fn set_message_folder(&self, id: &MessageId, folder_id: &FolderId) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET folder_id = ? WHERE id = ?",
            params![folder_id.as_str(), id.as_str()],
        )?;
        Ok(())
    }

    fn save_task(&self, record: TaskRecord) -> Result<()> {
        // ON CONFLICT keeps seq, so a rewritten record keeps its queue position
        self.conn().execute(
            "INSERT INTO tasks (id, account_id, status, payload, queued_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                account_id = excluded.account_id,
                status = excluded.status,
                payload = excluded.payload",
            params![
                record.id.as_str(),
                record.account_id.as_str(),
                record.status.as_str(),
                record.payload,
                record.queued_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn get_task(&self, id: &TaskId) -> Result<Option<TaskRecord>> {
        let row = self
            .conn()
            .query_row(
                "SELECT id, account_id, status, payload, queued_at FROM tasks WHERE id = ?",
                [id.as_str()],
                task_row,
            )
            .optional()?;
        row.map(record_from_row).transpose()
    }

    fn update_task_status(&self, id: &TaskId, status: TaskStatus) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE tasks SET status = ? WHERE id = ?",
            params![status.as_str(), id.as_str()],
        )?;
        if updated == 0 {
            bail!("Task {id} not found in task log");
        }
        Ok(())
    }

    fn list_unsettled_tasks(&self) -> Result<Vec<TaskRecord>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, account_id, status, payload, queued_at FROM tasks
                 WHERE status != ? ORDER BY seq ASC",
            )?;
            stmt.query_map([TaskStatus::Complete.as_str()], task_row)?
                .collect::<Result<Vec<_>, _>>()?
        };
        rows.into_iter().map(record_from_row).collect()
    }

    fn clear(&self) -> Result<()> {
        self.conn().execute_batch(
            "DELETE FROM tasks;
             DELETE FROM messages;
             DELETE FROM threads;
             DELETE FROM folders;",
        )?;
        Ok(())
    }
}
