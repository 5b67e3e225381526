use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::{FixType, ManualFixEntry, ManualFixError, ManualFixStore};

/// SQLite-backed manual fix store
pub struct SqliteManualFixStore {
    conn: Mutex<Connection>,
}

impl SqliteManualFixStore {
    pub fn new(path: &Path) -> Result<Self, ManualFixError> {
        let conn = Connection::open(path).map_err(|e| ManualFixError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, ManualFixError> {
        let conn =
            Connection::open_in_memory().map_err(|e| ManualFixError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), ManualFixError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS manual_fixes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_set_id TEXT NOT NULL,
                ticket_id TEXT NOT NULL,
                fix_type TEXT NOT NULL,
                external_key TEXT NOT NULL,
                instruction TEXT NOT NULL,
                error TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_manual_fixes_ticket_set_id ON manual_fixes(ticket_set_id);
            "#,
        )
        .map_err(|e| ManualFixError::Database(e.to_string()))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, ManualFixError> {
        self.conn
            .lock()
            .map_err(|_| ManualFixError::Database("connection lock poisoned".to_string()))
    }
}

impl ManualFixStore for SqliteManualFixStore {
    fn insert(&self, entry: &ManualFixEntry) -> Result<i64, ManualFixError> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO manual_fixes (ticket_set_id, ticket_id, fix_type, external_key, instruction, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                entry.ticket_set_id,
                entry.ticket_id,
                entry.fix_type.as_str(),
                entry.external_key,
                entry.instruction,
                entry.error,
                entry.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| ManualFixError::Database(e.to_string()))?;

        Ok(conn.last_insert_rowid())
    }

    fn list(&self, ticket_set_id: &str) -> Result<Vec<ManualFixEntry>, ManualFixError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, ticket_set_id, ticket_id, fix_type, external_key, instruction, error, created_at
                 FROM manual_fixes WHERE ticket_set_id = ? ORDER BY id ASC",
            )
            .map_err(|e| ManualFixError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![ticket_set_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(|e| ManualFixError::Database(e.to_string()))?;

        let mut entries = Vec::new();
        for row in rows {
            let (id, set_id, ticket_id, fix_type, external_key, instruction, error, created_at) =
                row.map_err(|e| ManualFixError::Database(e.to_string()))?;

            let fix_type = FixType::parse(&fix_type).ok_or_else(|| {
                ManualFixError::Database(format!("Unknown fix type: {}", fix_type))
            })?;
            let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| ManualFixError::Database(format!("Invalid timestamp: {}", e)))?
                .into();

            entries.push(ManualFixEntry {
                id,
                ticket_set_id: set_id,
                ticket_id,
                fix_type,
                external_key,
                instruction,
                error,
                created_at,
            });
        }

        Ok(entries)
    }
}
