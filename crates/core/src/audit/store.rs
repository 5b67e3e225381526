use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::AuditRecord;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: i64 = 100;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Filters and paging for reading the audit trail. Unset filters match everything.
#[derive(Debug, Clone)]
pub struct AuditQuery {
    pub ticket_set_id: Option<String>,
    pub ticket_id: Option<String>,
    pub event_type: Option<String>,
    /// Inclusive lower bound on the event time.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the event time.
    pub until: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            ticket_set_id: None,
            ticket_id: None,
            event_type: None,
            since: None,
            until: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl AuditQuery {
    /// Everything recorded for one ticket set.
    pub fn for_ticket_set(ticket_set_id: impl Into<String>) -> Self {
        Self {
            ticket_set_id: Some(ticket_set_id.into()),
            ..Self::default()
        }
    }
}

/// One page of the audit trail, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct AuditPage {
    pub events: Vec<AuditRecord>,
    /// Records matching the filters, ignoring paging.
    pub total: i64,
}

pub trait AuditStore: Send + Sync {
    /// Append records in the given order. Either all are stored or none.
    fn append(&self, records: &[AuditRecord]) -> Result<(), AuditError>;

    /// Read one page together with the total match count.
    fn page(&self, query: &AuditQuery) -> Result<AuditPage, AuditError>;
}
