//! SQLite storage implementation.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tokio::sync::Mutex;

use super::models::*;
use super::ChainStore;
use crate::chain::{chain_to_yaml, parse_chain_yaml, ChainDefinition, ChainSummary};
use crate::engine::ExecutionResult;
use crate::error::{Error, Result};
use crate::metrics;

/// Parse an RFC 3339 datetime string into a `chrono::DateTime<Utc>`.
///
/// Returns a `rusqlite::Error` on parse failure instead of panicking,
/// so it is safe to use inside `query_row` / `query_map` closures.
fn parse_datetime_utc(s: &str) -> rusqlite::Result<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn conversion_error(index: usize, e: serde_json::Error) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

/// Default history limit.
const DEFAULT_QUERY_LIMIT: usize = 20;
/// Maximum history limit to prevent abuse.
const MAX_QUERY_LIMIT: usize = 1000;

/// SQLite-based storage.
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut conn = Connection::open(path)?;

        // Initialize schema synchronously before wrapping in async mutex
        Self::init_schema_sync(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        Self::init_schema_sync(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema_sync(conn: &mut Connection) -> Result<()> {
        // WAL mode must be set before any transaction begins
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS chains (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                definition TEXT NOT NULL,
                link_count INTEGER NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                tags TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                chain_id TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                result TEXT NOT NULL,
                FOREIGN KEY (chain_id) REFERENCES chains(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_executions_chain ON executions(chain_id);
            "#,
        )?;
        Ok(())
    }

    /// Raw stored record, including the YAML definition.
    pub async fn get_stored_chain(&self, id: &str) -> Result<Option<StoredChain>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, definition, link_count, enabled, tags, created_at
             FROM chains WHERE id = ?1",
        )?;

        let chain = stmt
            .query_row([id], |row| {
                let tags: String = row.get(6)?;
                Ok(StoredChain {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    definition: row.get(3)?,
                    link_count: row.get::<_, i64>(4)?.max(0) as usize,
                    enabled: row.get(5)?,
                    tags: serde_json::from_str(&tags).map_err(|e| conversion_error(6, e))?,
                    created_at: parse_datetime_utc(&row.get::<_, String>(7)?)?,
                })
            })
            .optional()?;

        Ok(chain)
    }
}

#[async_trait]
impl ChainStore for SqliteStorage {
    async fn insert_chain(&self, chain: &ChainDefinition) -> Result<()> {
        let definition = chain_to_yaml(chain)?;
        let tags = serde_json::to_string(&chain.tags)?;

        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT INTO chains (id, name, description, definition, link_count, enabled, tags, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                chain.id,
                chain.name,
                chain.description,
                definition,
                chain.links.len() as i64,
                chain.config.enabled,
                tags,
                Utc::now().to_rfc3339(),
            ],
        );
        metrics::record_db_operation("insert_chain", inserted.is_ok());

        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(Error::Conflict(chain.id.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_chain(&self, id: &str) -> Result<Option<ChainDefinition>> {
        match self.get_stored_chain(id).await? {
            Some(stored) => Ok(Some(parse_chain_yaml(&stored.definition)?)),
            None => Ok(None),
        }
    }

    async fn list_chains(&self) -> Result<Vec<ChainSummary>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, description, link_count, enabled, tags
             FROM chains ORDER BY id",
        )?;

        let rows = stmt.query_map([], |row| {
            let tags: String = row.get(5)?;
            Ok(ChainSummary {
                id: row.get(0)?,
                name: row.get(1)?,
                description: row.get(2)?,
                link_count: row.get::<_, i64>(3)?.max(0) as usize,
                enabled: row.get(4)?,
                tags: serde_json::from_str(&tags).map_err(|e| conversion_error(5, e))?,
            })
        })?;

        let summaries = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    async fn delete_chain(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute("DELETE FROM chains WHERE id = ?1", [id])?;
        metrics::record_db_operation("delete_chain", true);
        Ok(deleted > 0)
    }

    async fn save_execution(&self, result: &ExecutionResult) -> Result<bool> {
        let body = serde_json::to_string(result)?;

        let conn = self.conn.lock().await;
        let inserted = conn.execute(
            "INSERT INTO executions (id, chain_id, status, started_at, finished_at, duration_ms, result)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7
             WHERE EXISTS (SELECT 1 FROM chains WHERE id = ?2)",
            params![
                result.execution_id,
                result.chain_id,
                result.status.to_string(),
                result.started_at.to_rfc3339(),
                result.finished_at.to_rfc3339(),
                result.duration_ms as i64,
                body,
            ],
        )?;
        metrics::record_db_operation("save_execution", true);
        Ok(inserted > 0)
    }

    async fn list_executions(&self, chain_id: &str, limit: usize) -> Result<Vec<ExecutionResult>> {
        let limit = match limit {
            0 => DEFAULT_QUERY_LIMIT,
            n => n.min(MAX_QUERY_LIMIT),
        };

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT result FROM executions
             WHERE chain_id = ?1
             ORDER BY rowid DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![chain_id, limit as i64], |row| {
            let body: String = row.get(0)?;
            serde_json::from_str::<ExecutionResult>(&body).map_err(|e| conversion_error(0, e))
        })?;

        let executions = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(executions)
    }

    async fn check_health(&self) -> Result<DatabaseHealth> {
        let conn = self.conn.lock().await;

        let integrity_check: String =
            conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        let busy_timeout_ms: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
        let chain_count: i64 = conn.query_row("SELECT COUNT(*) FROM chains", [], |row| row.get(0))?;
        let execution_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM executions", [], |row| row.get(0))?;

        Ok(DatabaseHealth {
            integrity_check,
            journal_mode,
            busy_timeout_ms,
            chain_count: chain_count.max(0) as u64,
            execution_count: execution_count.max(0) as u64,
        })
    }
}
