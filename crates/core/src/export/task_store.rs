//! Persistence of per-ticket-set export run records.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use super::{ErrorCategory, ExportStatus, ExportTaskState, FailureContext};

#[derive(Debug, Error)]
pub enum ExportTaskError {
    #[error("an export of ticket set {0} is already running")]
    AlreadyRunning(String),

    #[error("export of ticket set {ticket_set_id} exhausted its retry budget after {retry_count} failures: {last_error}")]
    RetryBudgetExhausted {
        ticket_set_id: String,
        retry_count: u32,
        last_error: String,
    },

    #[error("no export found for ticket set {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Storage for export run records, one per ticket set.
pub trait ExportTaskStore: Send + Sync {
    /// Atomically claim the ticket set for a new attempt and return the running record.
    ///
    /// - no record, or a completed one: a fresh run with a new task id
    /// - failed with budget left, or cancelled: the same run, resumed
    /// - running: `AlreadyRunning`
    /// - failed without budget: `RetryBudgetExhausted`
    fn try_begin(&self, ticket_set_id: &str) -> Result<ExportTaskState, ExportTaskError>;

    fn get(&self, ticket_set_id: &str) -> Result<Option<ExportTaskState>, ExportTaskError>;

    /// Insert or replace a record.
    fn save(&self, state: &ExportTaskState) -> Result<(), ExportTaskError>;

    /// Mark every `running` record as failed with `reason`. Returns the updated records.
    fn fail_interrupted(&self, reason: &str) -> Result<Vec<ExportTaskState>, ExportTaskError>;
}

/// Decide what `try_begin` does with an existing record.
pub(crate) fn begin_from(
    ticket_set_id: &str,
    existing: Option<ExportTaskState>,
) -> Result<ExportTaskState, ExportTaskError> {
    let Some(mut state) = existing else {
        return Ok(ExportTaskState::new(ticket_set_id));
    };

    match state.status {
        ExportStatus::Running => Err(ExportTaskError::AlreadyRunning(ticket_set_id.to_string())),
        ExportStatus::Completed => Ok(ExportTaskState::new(ticket_set_id)),
        ExportStatus::Failed if !state.has_budget() => {
            Err(ExportTaskError::RetryBudgetExhausted {
                ticket_set_id: ticket_set_id.to_string(),
                retry_count: state.retry_count,
                last_error: state
                    .failure_context
                    .as_ref()
                    .map(|c| c.error.clone())
                    .unwrap_or_default(),
            })
        }
        ExportStatus::Failed | ExportStatus::Cancelled => {
            state.resume();
            Ok(state)
        }
    }
}

/// Failure context for a run that never finished.
pub(crate) fn interrupted_context(reason: &str) -> FailureContext {
    FailureContext {
        last_ticket_index: None,
        processed_keys: Vec::new(),
        error: reason.to_string(),
        category: ErrorCategory::Temporary,
        failed_ticket_id: None,
    }
}

/// SQLite-backed export task store
pub struct SqliteExportTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteExportTaskStore {
    pub fn new(path: &Path) -> Result<Self, ExportTaskError> {
        let conn = Connection::open(path).map_err(|e| ExportTaskError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, ExportTaskError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ExportTaskError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ExportTaskError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS export_tasks (
                ticket_set_id TEXT PRIMARY KEY,
                task_id TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                failure_context TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                failed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_export_tasks_status ON export_tasks(status);
            "#,
        )
        .map_err(|e| ExportTaskError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ExportTaskError> {
        self.conn
            .lock()
            .map_err(|_| ExportTaskError::Database("connection lock poisoned".to_string()))
    }

    fn parse_time(s: &str) -> Result<DateTime<Utc>, ExportTaskError> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| ExportTaskError::Serialization(format!("Invalid timestamp: {}", e)))
    }

    fn row_to_state(row: &rusqlite::Row) -> rusqlite::Result<RawTaskRow> {
        Ok(RawTaskRow {
            ticket_set_id: row.get(0)?,
            task_id: row.get(1)?,
            status: row.get(2)?,
            retry_count: row.get(3)?,
            failure_context: row.get(4)?,
            started_at: row.get(5)?,
            completed_at: row.get(6)?,
            failed_at: row.get(7)?,
        })
    }

    fn select(
        conn: &Connection,
        ticket_set_id: &str,
    ) -> Result<Option<ExportTaskState>, ExportTaskError> {
        let raw = conn
            .query_row(
                "SELECT ticket_set_id, task_id, status, retry_count, failure_context, started_at, completed_at, failed_at
                 FROM export_tasks WHERE ticket_set_id = ?",
                params![ticket_set_id],
                Self::row_to_state,
            )
            .optional()
            .map_err(|e| ExportTaskError::Database(e.to_string()))?;

        raw.map(RawTaskRow::into_state).transpose()
    }

    fn upsert(conn: &Connection, state: &ExportTaskState) -> Result<(), ExportTaskError> {
        let failure_context = state
            .failure_context
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ExportTaskError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO export_tasks (ticket_set_id, task_id, status, retry_count, failure_context, started_at, completed_at, failed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(ticket_set_id) DO UPDATE SET
                task_id = excluded.task_id,
                status = excluded.status,
                retry_count = excluded.retry_count,
                failure_context = excluded.failure_context,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                failed_at = excluded.failed_at",
            params![
                state.ticket_set_id,
                state.task_id,
                state.status.as_str(),
                state.retry_count,
                failure_context,
                state.started_at.to_rfc3339(),
                state.completed_at.map(|t| t.to_rfc3339()),
                state.failed_at.map(|t| t.to_rfc3339()),
            ],
        )
        .map_err(|e| ExportTaskError::Database(e.to_string()))?;

        Ok(())
    }
}

struct RawTaskRow {
    ticket_set_id: String,
    task_id: String,
    status: String,
    retry_count: u32,
    failure_context: Option<String>,
    started_at: String,
    completed_at: Option<String>,
    failed_at: Option<String>,
}

impl RawTaskRow {
    fn into_state(self) -> Result<ExportTaskState, ExportTaskError> {
        let status = ExportStatus::parse(&self.status).ok_or_else(|| {
            ExportTaskError::Serialization(format!("Unknown export status: {}", self.status))
        })?;
        let failure_context = self
            .failure_context
            .map(|json| serde_json::from_str::<FailureContext>(&json))
            .transpose()
            .map_err(|e| ExportTaskError::Serialization(e.to_string()))?;

        Ok(ExportTaskState {
            ticket_set_id: self.ticket_set_id,
            task_id: self.task_id,
            status,
            retry_count: self.retry_count,
            failure_context,
            started_at: SqliteExportTaskStore::parse_time(&self.started_at)?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(SqliteExportTaskStore::parse_time)
                .transpose()?,
            failed_at: self
                .failed_at
                .as_deref()
                .map(SqliteExportTaskStore::parse_time)
                .transpose()?,
        })
    }
}

impl ExportTaskStore for SqliteExportTaskStore {
    fn try_begin(&self, ticket_set_id: &str) -> Result<ExportTaskState, ExportTaskError> {
        // Holding the connection lock across read and write makes the claim atomic.
        let conn = self.conn()?;
        let existing = Self::select(&conn, ticket_set_id)?;
        let state = begin_from(ticket_set_id, existing)?;
        Self::upsert(&conn, &state)?;
        Ok(state)
    }

    fn get(&self, ticket_set_id: &str) -> Result<Option<ExportTaskState>, ExportTaskError> {
        let conn = self.conn()?;
        Self::select(&conn, ticket_set_id)
    }

    fn save(&self, state: &ExportTaskState) -> Result<(), ExportTaskError> {
        let conn = self.conn()?;
        Self::upsert(&conn, state)
    }

    fn fail_interrupted(&self, reason: &str) -> Result<Vec<ExportTaskState>, ExportTaskError> {
        let conn = self.conn()?;

        let ids: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT ticket_set_id FROM export_tasks WHERE status = 'running'")
                .map_err(|e| ExportTaskError::Database(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| ExportTaskError::Database(e.to_string()))?;
            rows.collect::<Result<_, _>>()
                .map_err(|e| ExportTaskError::Database(e.to_string()))?
        };

        let mut updated = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut state) = Self::select(&conn, &id)? {
                state.mark_failed(interrupted_context(reason));
                Self::upsert(&conn, &state)?;
                updated.push(state);
            }
        }

        Ok(updated)
    }
}
