//! SQLite-backed storage, enabled with the `sqlite` feature.
//!
//! rusqlite is synchronous, so every call runs on the blocking pool while
//! holding the connection mutex. Compaction runs inside a single transaction.

use crate::store::{ConversationStore, PreferenceStore, SummaryStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parley_core::{
    ContextSummary, ConversationTurn, NewSummary, NewTurn, ParleyError, ParleyResult, Role, UserId,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS turns (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,
    role        TEXT    NOT NULL,
    content     TEXT    NOT NULL,
    provider_id TEXT,
    token_count INTEGER,
    created_at  TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_turns_user ON turns(user_id, id);

CREATE TABLE IF NOT EXISTS summaries (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id      INTEGER NOT NULL,
    summary_text TEXT    NOT NULL,
    covered_from INTEGER NOT NULL,
    covered_to   INTEGER NOT NULL,
    tokens_saved INTEGER NOT NULL,
    created_at   TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_summaries_user ON summaries(user_id, id);

CREATE TABLE IF NOT EXISTS preferences (
    user_id     INTEGER PRIMARY KEY,
    provider_id TEXT NOT NULL
);
";

fn db_err(e: rusqlite::Error) -> ParleyError {
    ParleyError::Session(format!("SQLite error: {e}"))
}

fn parse_time(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<ConversationTurn> {
    let role: String = row.get(2)?;
    Ok(ConversationTurn {
        id: row.get(0)?,
        user_id: row.get(1)?,
        role: Role::parse(&role).unwrap_or(Role::User),
        content: row.get(3)?,
        provider_id: row.get(4)?,
        token_count: row.get::<_, Option<i64>>(5)?.map(|n| n.max(0) as u64),
        timestamp: parse_time(row.get(6)?)?,
    })
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<ContextSummary> {
    Ok(ContextSummary {
        id: row.get(0)?,
        user_id: row.get(1)?,
        summary_text: row.get(2)?,
        covered_from: row.get(3)?,
        covered_to: row.get(4)?,
        estimated_tokens_saved: row.get::<_, i64>(5)?.max(0) as u64,
        created_at: parse_time(row.get(6)?)?,
    })
}

/// Durable store for turns, summaries and preferences in one SQLite file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> ParleyResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let conn = tokio::task::spawn_blocking(move || -> ParleyResult<Connection> {
            let conn = Connection::open(&path).map_err(db_err)?;
            conn.execute_batch(SCHEMA).map_err(db_err)?;
            Ok(conn)
        })
        .await
        .map_err(|e| ParleyError::Session(format!("Blocking task failed: {e}")))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, mostly for tests.
    pub fn in_memory() -> ParleyResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> ParleyResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| ParleyError::Session(format!("Blocking task failed: {e}")))?
        .map_err(db_err)
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn append_turn(&self, turn: NewTurn) -> ParleyResult<ConversationTurn> {
        let now = Utc::now();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO turns (user_id, role, content, provider_id, token_count, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    turn.user_id,
                    turn.role.as_str(),
                    turn.content,
                    turn.provider_id,
                    turn.token_count.map(|n| n as i64),
                    now.to_rfc3339(),
                ],
            )?;
            Ok(ConversationTurn {
                id: conn.last_insert_rowid(),
                user_id: turn.user_id,
                role: turn.role,
                content: turn.content,
                provider_id: turn.provider_id,
                token_count: turn.token_count,
                timestamp: now,
            })
        })
        .await
    }

    async fn recent_turns(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> ParleyResult<Vec<ConversationTurn>> {
        let mut turns = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, role, content, provider_id, token_count, created_at
                     FROM turns WHERE user_id = ?1 ORDER BY id DESC LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![user_id, limit as i64], turn_from_row)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await?;
        turns.reverse();
        Ok(turns)
    }

    async fn oldest_turns(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> ParleyResult<Vec<ConversationTurn>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, role, content, provider_id, token_count, created_at
                 FROM turns WHERE user_id = ?1 ORDER BY id ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![user_id, limit as i64], turn_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }

    async fn count_turns(&self, user_id: UserId) -> ParleyResult<usize> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM turns WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n.max(0) as usize)
        })
        .await
    }

    async fn compact(
        &self,
        summary: NewSummary,
        expected_turns: usize,
    ) -> ParleyResult<Option<ContextSummary>> {
        if summary.covered_from > summary.covered_to {
            return Err(ParleyError::Session(format!(
                "Invalid summary range [{}, {}]",
                summary.covered_from, summary.covered_to
            )));
        }

        let now = Utc::now();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let covered: i64 = tx.query_row(
                "SELECT COUNT(*) FROM turns WHERE user_id = ?1 AND id BETWEEN ?2 AND ?3",
                params![summary.user_id, summary.covered_from, summary.covered_to],
                |row| row.get(0),
            )?;
            if covered as usize != expected_turns {
                // Dropping the transaction rolls it back.
                return Ok(None);
            }

            tx.execute(
                "INSERT INTO summaries
                    (user_id, summary_text, covered_from, covered_to, tokens_saved, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    summary.user_id,
                    summary.summary_text,
                    summary.covered_from,
                    summary.covered_to,
                    summary.estimated_tokens_saved as i64,
                    now.to_rfc3339(),
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "DELETE FROM turns WHERE user_id = ?1 AND id BETWEEN ?2 AND ?3",
                params![summary.user_id, summary.covered_from, summary.covered_to],
            )?;
            tx.commit()?;

            Ok(Some(ContextSummary {
                id,
                user_id: summary.user_id,
                summary_text: summary.summary_text,
                covered_from: summary.covered_from,
                covered_to: summary.covered_to,
                estimated_tokens_saved: summary.estimated_tokens_saved,
                created_at: now,
            }))
        })
        .await
    }

    async fn clear_history(&self, user_id: UserId) -> ParleyResult<usize> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute("DELETE FROM turns WHERE user_id = ?1", params![user_id])?;
            tx.execute("DELETE FROM summaries WHERE user_id = ?1", params![user_id])?;
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }
}

#[async_trait]
impl SummaryStore for SqliteStore {
    async fn summaries(&self, user_id: UserId) -> ParleyResult<Vec<ContextSummary>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, summary_text, covered_from, covered_to, tokens_saved, created_at
                 FROM summaries WHERE user_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], summary_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })
        .await
    }
}

#[async_trait]
impl PreferenceStore for SqliteStore {
    async fn get_preference(&self, user_id: UserId) -> ParleyResult<Option<String>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT provider_id FROM preferences WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    async fn set_preference(&self, user_id: UserId, provider_id: &str) -> ParleyResult<()> {
        let provider_id = provider_id.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO preferences (user_id, provider_id) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET provider_id = excluded.provider_id",
                params![user_id, provider_id],
            )
            .map(|_| ())
        })
        .await
    }
}
