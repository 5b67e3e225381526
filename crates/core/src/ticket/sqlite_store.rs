//! SQLite-backed ticket store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Attachment, AttachmentUploadStatus, CreateTicketRequest, DependencyEdge, EntityGroup,
    ExternalRef, TicketError, TicketNode, TicketStore,
};

const TICKET_COLUMNS: &str = "id, ticket_set_id, title, body, entity_group, user_order, \
    ready_for_export, external_key, external_url, attachment_filename, attachment_content, \
    attachment_status, created_at, updated_at";

/// SQLite-backed ticket store.
pub struct SqliteTicketStore {
    conn: Mutex<Connection>,
}

impl SqliteTicketStore {
    /// Create a new SQLite ticket store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TicketError> {
        let conn = Connection::open(path).map_err(|e| TicketError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite ticket store (useful for testing).
    pub fn in_memory() -> Result<Self, TicketError> {
        let conn =
            Connection::open_in_memory().map_err(|e| TicketError::Database(e.to_string()))?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TicketError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id TEXT PRIMARY KEY,
                ticket_set_id TEXT NOT NULL,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                entity_group TEXT NOT NULL,
                user_order INTEGER NOT NULL DEFAULT 0,
                ready_for_export INTEGER NOT NULL DEFAULT 0,
                external_key TEXT,
                external_url TEXT,
                attachment_filename TEXT,
                attachment_content TEXT,
                attachment_status TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_ticket_set_id ON tickets(ticket_set_id);
            CREATE INDEX IF NOT EXISTS idx_tickets_ready ON tickets(ticket_set_id, ready_for_export);

            CREATE TABLE IF NOT EXISTS ticket_dependencies (
                ticket_set_id TEXT NOT NULL,
                ticket_id TEXT NOT NULL,
                depends_on_ticket_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (ticket_id, depends_on_ticket_id),
                CHECK (ticket_id != depends_on_ticket_id)
            );

            CREATE INDEX IF NOT EXISTS idx_ticket_dependencies_set
                ON ticket_dependencies(ticket_set_id);
            "#,
        )
        .map_err(|e| TicketError::Database(e.to_string()))?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, TicketError> {
        self.conn
            .lock()
            .map_err(|_| TicketError::Database("connection lock poisoned".to_string()))
    }

    fn parse_timestamp(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<TicketNode> {
        let entity_group: String = row.get(4)?;
        let ready: i64 = row.get(6)?;
        let external_key: Option<String> = row.get(7)?;
        let external_url: Option<String> = row.get(8)?;
        let attachment_filename: Option<String> = row.get(9)?;
        let attachment_content: Option<String> = row.get(10)?;
        let attachment_status: Option<String> = row.get(11)?;
        let created_at: String = row.get(12)?;
        let updated_at: String = row.get(13)?;

        let external = external_key.map(|key| ExternalRef {
            key,
            url: external_url.unwrap_or_default(),
        });

        let attachment = match (attachment_filename, attachment_content) {
            (Some(filename), Some(content)) => Some(Attachment {
                filename,
                content,
                upload_status: attachment_status
                    .as_deref()
                    .and_then(AttachmentUploadStatus::parse)
                    .unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(TicketNode {
            id: row.get(0)?,
            ticket_set_id: row.get(1)?,
            title: row.get(2)?,
            body: row.get(3)?,
            attachment,
            entity_group: serde_json::from_value(serde_json::Value::String(entity_group))
                .unwrap_or(EntityGroup::Custom),
            user_order: row.get(5)?,
            ready_for_export: ready != 0,
            external,
            created_at: Self::parse_timestamp(&created_at),
            updated_at: Self::parse_timestamp(&updated_at),
        })
    }

    fn entity_group_column(group: EntityGroup) -> Result<String, TicketError> {
        match serde_json::to_value(group) {
            Ok(serde_json::Value::String(s)) => Ok(s),
            Ok(other) => Err(TicketError::Database(format!(
                "unexpected entity group encoding: {}",
                other
            ))),
            Err(e) => Err(TicketError::Database(e.to_string())),
        }
    }

    fn query_tickets(
        &self,
        where_clause: &str,
        ticket_set_id: &str,
    ) -> Result<Vec<TicketNode>, TicketError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM tickets WHERE {} ORDER BY created_at ASC, id ASC",
            TICKET_COLUMNS, where_clause
        );
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let tickets = stmt
            .query_map(params![ticket_set_id], Self::row_to_ticket)
            .map_err(|e| TicketError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TicketError::Database(e.to_string()))?;

        Ok(tickets)
    }

    /// Run an UPDATE whose last two placeholders are `updated_at` and `id`.
    fn touch(
        conn: &Connection,
        sql: &str,
        id: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<(), TicketError> {
        let now = Utc::now().to_rfc3339();
        let mut values: Vec<&dyn rusqlite::ToSql> = args.to_vec();
        values.push(&now);
        values.push(&id);

        let updated = conn
            .execute(sql, values.as_slice())
            .map_err(|e| TicketError::Database(e.to_string()))?;

        if updated == 0 {
            return Err(TicketError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

impl TicketStore for SqliteTicketStore {
    fn create(&self, request: CreateTicketRequest) -> Result<TicketNode, TicketError> {
        let conn = self.conn()?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let group = Self::entity_group_column(request.entity_group)?;

        conn.execute(
            "INSERT INTO tickets (id, ticket_set_id, title, body, entity_group, user_order, ready_for_export, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                request.ticket_set_id,
                request.title,
                request.body,
                group,
                request.user_order,
                request.ready_for_export as i64,
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .map_err(|e| TicketError::Database(e.to_string()))?;

        Ok(TicketNode {
            id,
            ticket_set_id: request.ticket_set_id,
            title: request.title,
            body: request.body,
            attachment: None,
            entity_group: request.entity_group,
            user_order: request.user_order,
            ready_for_export: request.ready_for_export,
            external: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn get(&self, id: &str) -> Result<Option<TicketNode>, TicketError> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS);

        conn.query_row(&sql, params![id], Self::row_to_ticket)
            .optional()
            .map_err(|e| TicketError::Database(e.to_string()))
    }

    fn list_for_set(&self, ticket_set_id: &str) -> Result<Vec<TicketNode>, TicketError> {
        self.query_tickets("ticket_set_id = ?", ticket_set_id)
    }

    fn list_export_ready(&self, ticket_set_id: &str) -> Result<Vec<TicketNode>, TicketError> {
        self.query_tickets("ticket_set_id = ? AND ready_for_export = 1", ticket_set_id)
    }

    fn set_external_ref(&self, id: &str, external: &ExternalRef) -> Result<(), TicketError> {
        let conn = self.conn()?;
        Self::touch(
            &conn,
            "UPDATE tickets SET external_key = ?, external_url = ?, updated_at = ? WHERE id = ?",
            id,
            &[&external.key, &external.url],
        )
    }

    fn set_attachment(&self, id: &str, filename: &str, content: &str) -> Result<(), TicketError> {
        let conn = self.conn()?;
        let status = AttachmentUploadStatus::Pending.as_str();
        Self::touch(
            &conn,
            "UPDATE tickets SET attachment_filename = ?, attachment_content = ?, attachment_status = ?, updated_at = ? WHERE id = ?",
            id,
            &[&filename, &content, &status],
        )
    }

    fn set_attachment_status(
        &self,
        id: &str,
        status: AttachmentUploadStatus,
    ) -> Result<(), TicketError> {
        let conn = self.conn()?;

        let has_attachment: Option<Option<String>> = conn
            .query_row(
                "SELECT attachment_filename FROM tickets WHERE id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| TicketError::Database(e.to_string()))?;

        match has_attachment {
            None => Err(TicketError::NotFound(id.to_string())),
            Some(None) => Err(TicketError::NoAttachment(id.to_string())),
            Some(Some(_)) => {
                let status = status.as_str();
                Self::touch(
                    &conn,
                    "UPDATE tickets SET attachment_status = ?, updated_at = ? WHERE id = ?",
                    id,
                    &[&status],
                )
            }
        }
    }

    fn add_edge(&self, ticket_set_id: &str, edge: &DependencyEdge) -> Result<(), TicketError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO ticket_dependencies (ticket_set_id, ticket_id, depends_on_ticket_id, created_at) VALUES (?, ?, ?, ?)",
            params![ticket_set_id, edge.from, edge.to, Utc::now().to_rfc3339()],
        )
        .map_err(|e| TicketError::Database(e.to_string()))?;
        Ok(())
    }

    fn remove_edge(&self, ticket_set_id: &str, edge: &DependencyEdge) -> Result<bool, TicketError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM ticket_dependencies WHERE ticket_set_id = ? AND ticket_id = ? AND depends_on_ticket_id = ?",
                params![ticket_set_id, edge.from, edge.to],
            )
            .map_err(|e| TicketError::Database(e.to_string()))?;
        Ok(removed > 0)
    }

    fn list_edges(&self, ticket_set_id: &str) -> Result<Vec<DependencyEdge>, TicketError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ticket_id, depends_on_ticket_id FROM ticket_dependencies WHERE ticket_set_id = ? ORDER BY created_at ASC, ticket_id ASC, depends_on_ticket_id ASC",
            )
            .map_err(|e| TicketError::Database(e.to_string()))?;

        let edges = stmt
            .query_map(params![ticket_set_id], |row| {
                Ok(DependencyEdge {
                    from: row.get(0)?,
                    to: row.get(1)?,
                })
            })
            .map_err(|e| TicketError::Database(e.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TicketError::Database(e.to_string()))?;

        Ok(edges)
    }
}
