use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use super::{ManualFixEntry, NewManualFix};

#[derive(Debug, Error)]
pub enum ManualFixError {
    #[error("Database error: {0}")]
    Database(String),
}

/// Append-only storage for manual fixes. Entries are never updated or deleted.
pub trait ManualFixStore: Send + Sync {
    fn insert(&self, entry: &ManualFixEntry) -> Result<i64, ManualFixError>;

    /// Entries for a ticket set in insertion order.
    fn list(&self, ticket_set_id: &str) -> Result<Vec<ManualFixEntry>, ManualFixError>;
}

/// Registry the export orchestrator records partial failures into.
#[derive(Clone)]
pub struct ManualFixRegistry {
    store: Arc<dyn ManualFixStore>,
}

impl ManualFixRegistry {
    pub fn new(store: Arc<dyn ManualFixStore>) -> Self {
        Self { store }
    }

    /// Record a fix and return the stored entry.
    pub fn append(&self, fix: NewManualFix) -> Result<ManualFixEntry, ManualFixError> {
        let mut entry = ManualFixEntry {
            id: 0,
            ticket_set_id: fix.ticket_set_id,
            ticket_id: fix.ticket_id,
            fix_type: fix.fix_type,
            external_key: fix.external_key,
            instruction: fix.instruction,
            error: fix.error,
            created_at: Utc::now(),
        };
        entry.id = self.store.insert(&entry)?;

        tracing::warn!(
            ticket_set_id = %entry.ticket_set_id,
            ticket_id = %entry.ticket_id,
            fix_type = %entry.fix_type,
            external_key = %entry.external_key,
            "Manual fix recorded: {}",
            entry.instruction
        );

        Ok(entry)
    }

    pub fn list_for_ticket_set(
        &self,
        ticket_set_id: &str,
    ) -> Result<Vec<ManualFixEntry>, ManualFixError> {
        self.store.list(ticket_set_id)
    }
}
