use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{ValidationError, ValidationRecord, ValidationStore};

/// SQLite-backed validation store
pub struct SqliteValidationStore {
    conn: Mutex<Connection>,
}

impl SqliteValidationStore {
    /// Create a new SQLite validation store, creating the database file and tables if needed
    pub fn new(path: &Path) -> Result<Self, ValidationError> {
        let conn = Connection::open(path).map_err(|e| ValidationError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite validation store (useful for testing)
    pub fn in_memory() -> Result<Self, ValidationError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ValidationError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ValidationError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS ticket_set_validations (
                ticket_set_id TEXT PRIMARY KEY,
                passed INTEGER NOT NULL DEFAULT 0,
                last_validated_at TEXT,
                last_invalidated_at TEXT,
                results TEXT
            );
            "#,
        )
        .map_err(|e| ValidationError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ValidationError> {
        self.conn
            .lock()
            .map_err(|_| ValidationError::Database("connection lock poisoned".to_string()))
    }

    fn parse_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>, ValidationError> {
        value
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|e| ValidationError::Serialization(e.to_string()))
            })
            .transpose()
    }
}

impl ValidationStore for SqliteValidationStore {
    fn get(&self, ticket_set_id: &str) -> Result<Option<ValidationRecord>, ValidationError> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                "SELECT passed, last_validated_at, last_invalidated_at, results FROM ticket_set_validations WHERE ticket_set_id = ?",
                params![ticket_set_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| ValidationError::Database(e.to_string()))?;

        let Some((passed, validated, invalidated, results)) = row else {
            return Ok(None);
        };

        let results = results
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| ValidationError::Serialization(e.to_string()))?;

        Ok(Some(ValidationRecord {
            ticket_set_id: ticket_set_id.to_string(),
            passed: passed != 0,
            last_validated_at: Self::parse_timestamp(validated)?,
            last_invalidated_at: Self::parse_timestamp(invalidated)?,
            results,
        }))
    }

    fn save(&self, record: &ValidationRecord) -> Result<(), ValidationError> {
        let conn = self.conn()?;

        let results = record
            .results
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| ValidationError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO ticket_set_validations (ticket_set_id, passed, last_validated_at, last_invalidated_at, results)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(ticket_set_id) DO UPDATE SET
                passed = excluded.passed,
                last_validated_at = excluded.last_validated_at,
                last_invalidated_at = excluded.last_invalidated_at,
                results = excluded.results",
            params![
                record.ticket_set_id,
                record.passed as i64,
                record.last_validated_at.map(|t| t.to_rfc3339()),
                record.last_invalidated_at.map(|t| t.to_rfc3339()),
                results,
            ],
        )
        .map_err(|e| ValidationError::Database(e.to_string()))?;

        Ok(())
    }
}
