//! Persistence gateway - the chat log in SQLite
//!
//! Uses `spawn_blocking` for async-safe SQLite access. One connection is
//! shared behind a mutex, so appends are serialized and a record's id and
//! clamped timestamp are decided atomically.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};
use thiserror::Error;
use tracing::{debug, info};

use chatrelay_protocol::{new_id, MessageRecord, NewRecord, RecordKind};

use crate::migration_runner::run_migrations;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Durable, append-only chat log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a record, assigning its id. The stored timestamp never precedes
    /// the latest one already in the log.
    async fn append(&self, record: NewRecord) -> Result<MessageRecord, StoreError>;

    /// The `limit` most recent records, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError>;

    /// Every record, oldest first.
    async fn all(&self) -> Result<Vec<MessageRecord>, StoreError>;
}

/// Current time as ISO 8601 UTC with microsecond precision.
///
/// Fixed width, so string order matches time order.
pub fn chrono_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and bring its schema up to date.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut conn = Connection::open(path)?;

        // Set up connection for concurrent access
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;",
        )?;
        run_migrations(&mut conn)?;

        info!(
            component = "persistence",
            event = "persistence.opened",
            path = %path.display(),
            "Message store opened"
        );
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        run_migrations(&mut conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
        .await?;
        Ok(result?)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, record: NewRecord) -> Result<MessageRecord, StoreError> {
        let stored = self.with_conn(move |conn| insert_record(conn, record)).await?;
        debug!(
            component = "persistence",
            event = "persistence.appended",
            record_id = %stored.id,
            kind = stored.kind.as_str(),
            "Record appended"
        );
        Ok(stored)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<MessageRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, sender, body, timestamp, attachment, error
                 FROM messages
                 ORDER BY timestamp DESC, seq DESC
                 LIMIT ?1",
            )?;
            let records = stmt
                .query_map(params![limit], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }

    async fn all(&self) -> Result<Vec<MessageRecord>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, sender, body, timestamp, attachment, error
                 FROM messages
                 ORDER BY timestamp ASC, seq ASC",
            )?;
            let records = stmt
                .query_map([], record_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(records)
        })
        .await
    }
}

fn insert_record(conn: &Connection, mut record: NewRecord) -> Result<MessageRecord, rusqlite::Error> {
    let latest: Option<String> =
        conn.query_row("SELECT MAX(timestamp) FROM messages", [], |row| row.get(0))?;
    if let Some(latest) = latest {
        if record.timestamp < latest {
            record.timestamp = latest;
        }
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO messages (id, kind, sender, body, timestamp, attachment, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            record.kind.as_str(),
            record.sender,
            record.body,
            record.timestamp,
            record.attachment,
            record.error,
        ],
    )?;

    Ok(record.into_record(id))
}

fn record_from_row(row: &Row<'_>) -> Result<MessageRecord, rusqlite::Error> {
    let kind: String = row.get(1)?;
    Ok(MessageRecord {
        id: row.get(0)?,
        kind: RecordKind::parse(&kind).unwrap_or(RecordKind::Text),
        sender: row.get(2)?,
        body: row.get(3)?,
        timestamp: row.get(4)?,
        attachment: row.get(5)?,
        error: row.get(6)?,
    })
}
