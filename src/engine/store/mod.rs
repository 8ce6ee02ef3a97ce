// ── Engine: Metadata Store ─────────────────────────────────────────────────
// Conversation/message metadata persisted to SQLite via rusqlite. The
// gateway records an exchange after a real provider success — never for
// cache hits or fallback-only outcomes. The schema is deliberately small:
// project CRUD lives outside this service.

use crate::atoms::error::EngineResult;
use crate::atoms::types::AiResponse;
use log::info;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

/// Thread-safe database wrapper. The connection is protected by a Mutex;
/// every operation is a short transaction.
pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl MetadataStore {
    /// Open (or create) the database and initialize tables.
    /// `":memory:"` is accepted for tests.
    pub fn open(path: &str) -> EngineResult<Self> {
        info!("[store] opening metadata store at {path}");
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversations (
                id          TEXT PRIMARY KEY,
                project_id  TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_scope
                ON conversations(project_id, user_id);
            CREATE TABLE IF NOT EXISTS messages (
                id               TEXT PRIMARY KEY,
                conversation_id  TEXT NOT NULL REFERENCES conversations(id),
                role             TEXT NOT NULL,
                content          TEXT NOT NULL,
                metadata         TEXT,
                created_at       TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_conversation
                ON messages(conversation_id);",
        )?;
        Ok(MetadataStore { conn: Mutex::new(conn) })
    }

    /// Record one user→assistant exchange with the response metadata.
    pub fn record_exchange(
        &self,
        project_id: &str,
        user_id: &str,
        message: &str,
        response: &AiResponse,
    ) -> EngineResult<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock();

        let conversation_id: String = match conn
            .query_row(
                "SELECT id FROM conversations WHERE project_id = ?1 AND user_id = ?2",
                params![project_id, user_id],
                |row| row.get(0),
            ) {
            Ok(id) => id,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let id = uuid::Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO conversations (id, project_id, user_id, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![id, project_id, user_id, now],
                )?;
                id
            }
            Err(e) => return Err(e.into()),
        };

        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, metadata, created_at)
             VALUES (?1, ?2, 'user', ?3, NULL, ?4)",
            params![uuid::Uuid::new_v4().to_string(), conversation_id, message, now],
        )?;
        let metadata = serde_json::to_string(response)?;
        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, metadata, created_at)
             VALUES (?1, ?2, 'assistant', ?3, ?4, ?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                conversation_id,
                response.content,
                metadata,
                now
            ],
        )?;
        Ok(())
    }

    pub fn message_count(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?)
    }

    pub fn conversation_count(&self) -> EngineResult<i64> {
        let conn = self.conn.lock();
        Ok(conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?)
    }
}
