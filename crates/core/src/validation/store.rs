use thiserror::Error;

use super::ValidationRecord;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Trait for validation record storage
pub trait ValidationStore: Send + Sync {
    /// Get the record for a ticket set, if one exists
    fn get(&self, ticket_set_id: &str) -> Result<Option<ValidationRecord>, ValidationError>;

    /// Insert or replace the record for its ticket set
    fn save(&self, record: &ValidationRecord) -> Result<(), ValidationError>;
}
