//! External ticket client trait and error model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference to a ticket created in the external tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedTicket {
    pub key: String,
    pub url: String,
}

/// Errors reported by the external tracker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalError {
    #[error("rate limited by external tracker")]
    RateLimited {
        /// Server-suggested wait, when provided.
        retry_after_ms: Option<u64>,
    },

    #[error("request to external tracker timed out")]
    Timeout,

    #[error("external tracker rejected credentials")]
    Unauthorized,

    #[error("external tracker denied access: {0}")]
    Forbidden(String),

    #[error("not found in external tracker: {0}")]
    NotFound(String),

    #[error("external tracker error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected response from external tracker: {0}")]
    InvalidResponse(String),
}

impl ExternalError {
    /// Whether retrying the same call later may succeed.
    ///
    /// Rate limits, timeouts, connection failures and 5xx responses are
    /// transient. Everything else needs someone to change something first.
    pub fn is_transient(&self) -> bool {
        match self {
            ExternalError::RateLimited { .. }
            | ExternalError::Timeout
            | ExternalError::Network(_) => true,
            ExternalError::Api { status, .. } => *status >= 500,
            ExternalError::Unauthorized
            | ExternalError::Forbidden(_)
            | ExternalError::NotFound(_)
            | ExternalError::InvalidResponse(_) => false,
        }
    }

    /// Whether an administrator has to fix credentials or permissions.
    pub fn is_auth(&self) -> bool {
        matches!(self, ExternalError::Unauthorized | ExternalError::Forbidden(_))
    }
}

impl From<reqwest::Error> for ExternalError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ExternalError::Timeout
        } else if e.is_decode() {
            ExternalError::InvalidResponse(e.to_string())
        } else {
            ExternalError::Network(e.to_string())
        }
    }
}

/// Client for the external work tracker.
///
/// Calls are not idempotent: a repeated `create_ticket` makes a second ticket.
#[async_trait]
pub trait ExternalTicketClient: Send + Sync {
    /// Create a ticket and return its key and browse URL.
    async fn create_ticket(&self, title: &str, body: &str) -> Result<CreatedTicket, ExternalError>;

    /// Upload a file to an existing ticket.
    async fn upload_attachment(
        &self,
        key: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<(), ExternalError>;

    /// Record that `key_a` depends on (is blocked by) `key_b`.
    async fn create_link(&self, key_a: &str, key_b: &str) -> Result<(), ExternalError>;
}
