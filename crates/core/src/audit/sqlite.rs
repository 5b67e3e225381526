use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

use super::{AuditError, AuditEvent, AuditPage, AuditQuery, AuditRecord, AuditStore};

/// Columns of `audit_events` in select order, before decoding.
type RawRow = (i64, String, String, Option<String>, Option<String>, String);

/// SQLite-backed audit store
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    /// Create a new SQLite audit store, creating the database file and tables if needed
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        let conn = Connection::open(path).map_err(|e| AuditError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite audit store (useful for testing)
    pub fn in_memory() -> Result<Self, AuditError> {
        let conn = Connection::open_in_memory().map_err(|e| AuditError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), AuditError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                ticket_set_id TEXT,
                ticket_id TEXT,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_audit_events_ticket_set_id ON audit_events(ticket_set_id);
            CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
            "#,
        )
        .map_err(|e| AuditError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("connection lock poisoned".to_string()))
    }

    /// `WHERE` clause and bound values for the filters of `query`.
    fn conditions(query: &AuditQuery) -> (String, Vec<Value>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        let columns = [
            ("ticket_set_id = ?", &query.ticket_set_id),
            ("ticket_id = ?", &query.ticket_id),
            ("event_type = ?", &query.event_type),
        ];
        for (clause, value) in columns {
            if let Some(value) = value {
                clauses.push(clause);
                values.push(Value::Text(value.clone()));
            }
        }
        if let Some(since) = query.since {
            clauses.push("timestamp >= ?");
            values.push(Value::Text(since.to_rfc3339()));
        }
        if let Some(until) = query.until {
            clauses.push("timestamp <= ?");
            values.push(Value::Text(until.to_rfc3339()));
        }

        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), values)
        }
    }

    fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
        ))
    }
}

impl AuditStore for SqliteAuditStore {
    fn append(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AuditError::Database(e.to_string()))?;

        for record in records {
            let data = serde_json::to_string(&record.data)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;
            tx.execute(
                "INSERT INTO audit_events (timestamp, event_type, ticket_set_id, ticket_id, data) VALUES (?, ?, ?, ?, ?)",
                params![
                    record.timestamp.to_rfc3339(),
                    record.event_type,
                    record.ticket_set_id,
                    record.ticket_id,
                    data,
                ],
            )
            .map_err(|e| AuditError::Database(e.to_string()))?;
        }

        tx.commit().map_err(|e| AuditError::Database(e.to_string()))
    }

    fn page(&self, query: &AuditQuery) -> Result<AuditPage, AuditError> {
        let conn = self.conn()?;
        let (where_clause, mut values) = Self::conditions(query);

        let total: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM audit_events {}", where_clause),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )
            .map_err(|e| AuditError::Database(e.to_string()))?;

        // id breaks ties between events written within the same instant
        let sql = format!(
            "SELECT id, timestamp, event_type, ticket_set_id, ticket_id, data FROM audit_events {} ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        values.push(Value::Integer(query.limit));
        values.push(Value::Integer(query.offset));

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AuditError::Database(e.to_string()))?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), Self::read_row)
            .map_err(|e| AuditError::Database(e.to_string()))?;

        let mut events = Vec::new();
        for row in rows {
            let (id, timestamp, event_type, ticket_set_id, ticket_id, data) =
                row.map_err(|e| AuditError::Database(e.to_string()))?;
            let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp)
                .map_err(|e| AuditError::Database(format!("Invalid timestamp: {}", e)))?
                .into();
            let data: AuditEvent = serde_json::from_str(&data)
                .map_err(|e| AuditError::Serialization(e.to_string()))?;

            events.push(AuditRecord {
                id,
                timestamp,
                event_type,
                ticket_set_id,
                ticket_id,
                data,
            });
        }

        Ok(AuditPage { events, total })
    }
}
