//! Embedded single-file driver.
//!
//! One `rusqlite::Connection` behind a mutex; every operation hops to the
//! blocking pool so repository calls stay async-friendly. SQLite's single
//! writer combined with the mutex serializes multi-statement transactions.

mod clusters;
mod misc;
mod schema;
mod services;
mod task_definitions;
mod task_sets;
mod tasks;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::Value;

use crate::error::{Result, StorageError};
use crate::repository::StorePing;

pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` and applies the schema.
    /// `:memory:` opens a private in-memory database, used by tests.
    pub async fn open(path: &str) -> Result<Self> {
        let path = path.to_string();
        let db = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            // WAL keeps readers unblocked during reconciler write-backs; the
            // pragma returns a row, so query_row instead of execute.
            let _ = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get::<_, String>(0));
            schema::init(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StorageError::Database(format!("sqlite open task failed: {e}")))??;

        Ok(SqliteStore {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Runs `f` against the connection on the blocking pool.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut conn)
        })
        .await
        .map_err(|e| StorageError::Database(format!("sqlite worker panicked: {e}")))?
    }
}

#[async_trait]
impl StorePing for SqliteStore {
    async fn ping(&self) -> Result<()> {
        self.call(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }
}

// Column helpers shared by the per-entity modules.

pub(crate) fn json_text(value: &Value) -> String {
    value.to_string()
}

pub(crate) fn opt_json_text(value: &Option<Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

pub(crate) fn parse_json(text: String) -> Result<Value> {
    Ok(serde_json::from_str(&text)?)
}

pub(crate) fn parse_opt_json(text: Option<String>) -> Result<Option<Value>> {
    text.map(|t| Ok(serde_json::from_str(&t)?)).transpose()
}

pub(crate) fn parse_enum<T>(
    raw: &str,
    parse: fn(&str) -> Option<T>,
    what: &'static str,
) -> Result<T> {
    parse(raw).ok_or_else(|| StorageError::Database(format!("corrupt {what} column: {raw:?}")))
}
