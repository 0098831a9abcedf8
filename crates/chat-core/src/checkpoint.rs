//! SQLite-backed conversation checkpoints.
//!
//! One table, `checkpoints`, holds every message ever appended to any
//! thread. Rows are only ever inserted; a thread exists once it has a row.

use crate::error::{ChatError, Result};
use crate::types::{Message, Role, ToolCall};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS checkpoints (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        thread_id TEXT NOT NULL,
        message_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        tool_call_id TEXT,
        tool_calls TEXT,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints(thread_id, id);
"#;

/// Location of the checkpoint database. Connections are opened per request.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Open a connection, creating the schema on first use. The connection
    /// closes when the returned handle is dropped.
    pub fn open(&self) -> Result<Checkpointer> {
        let conn = Connection::open(&self.path)?;
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            warn!(
                "Could not enable WAL on {}, using the default journal: {}",
                self.path.display(),
                e
            );
        }
        Checkpointer::with_connection(conn)
    }
}

/// Messages of one thread split by role, each in original relative order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadMessages {
    pub human: Vec<String>,
    pub ai: Vec<String>,
    pub tool: Vec<String>,
}

impl ThreadMessages {
    pub fn partition(messages: &[Message]) -> Self {
        let mut out = Self::default();
        for msg in messages {
            let bucket = match msg.role {
                Role::Human => &mut out.human,
                Role::Ai => &mut out.ai,
                Role::Tool => &mut out.tool,
            };
            bucket.push(msg.content.clone());
        }
        out
    }
}

/// An open connection to the checkpoint database.
pub struct Checkpointer {
    conn: Mutex<Connection>,
}

impl Checkpointer {
    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory database, for tests.
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ChatError::Other(anyhow::anyhow!("checkpoint connection lock poisoned")))
    }

    /// Every thread with at least one checkpointed message, in order of first write.
    pub fn thread_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT thread_id FROM checkpoints GROUP BY thread_id ORDER BY MIN(id)")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Append one message to a thread.
    pub fn append(&self, thread_id: &str, message: &Message) -> Result<()> {
        let tool_calls = message
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.conn()?.execute(
            "INSERT INTO checkpoints
                (thread_id, message_id, role, content, tool_call_id, tool_calls, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                thread_id,
                message.id,
                message.role.as_str(),
                message.content,
                message.tool_call_id,
                tool_calls,
                message.timestamp.to_rfc3339(),
            ],
        )?;
        debug!(thread = thread_id, role = %message.role, "Checkpointed message");
        Ok(())
    }

    /// Full history of a thread, oldest first. Empty for an unknown thread.
    pub fn history(&self, thread_id: &str) -> Result<Vec<Message>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT message_id, role, content, tool_call_id, tool_calls, created_at
                 FROM checkpoints WHERE thread_id = ?1 ORDER BY id",
            )?;
            let rows = stmt
                .query_map(params![thread_id], |row| {
                    Ok(StoredRow {
                        message_id: row.get(0)?,
                        role: row.get(1)?,
                        content: row.get(2)?,
                        tool_call_id: row.get(3)?,
                        tool_calls: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(StoredRow::into_message).collect()
    }

    /// Full history of a thread that must already exist.
    pub fn messages(&self, thread_id: &str) -> Result<Vec<Message>> {
        let messages = self.history(thread_id)?;
        if messages.is_empty() {
            return Err(ChatError::NotFound(format!("no checkpoint for thread '{}'", thread_id)));
        }
        Ok(messages)
    }

    pub fn messages_by_role(&self, thread_id: &str) -> Result<ThreadMessages> {
        Ok(ThreadMessages::partition(&self.messages(thread_id)?))
    }
}

struct StoredRow {
    message_id: String,
    role: String,
    content: String,
    tool_call_id: Option<String>,
    tool_calls: Option<String>,
    created_at: String,
}

impl StoredRow {
    fn into_message(self) -> Result<Message> {
        let role: Role = self
            .role
            .parse()
            .map_err(|e: String| ChatError::Other(anyhow::anyhow!(e)))?;
        let tool_calls = self
            .tool_calls
            .as_deref()
            .map(serde_json::from_str::<Vec<ToolCall>>)
            .transpose()?;
        let timestamp = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| ChatError::Other(anyhow::anyhow!("bad checkpoint timestamp: {}", e)))?;

        Ok(Message {
            id: self.message_id,
            role,
            content: self.content,
            tool_call_id: self.tool_call_id,
            tool_calls,
            timestamp,
        })
    }
}
