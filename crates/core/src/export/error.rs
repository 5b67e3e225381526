//! Run-stopping export errors.

use thiserror::Error;

use crate::external::ExternalError;
use crate::graph::CycleError;
use crate::ticket::TicketError;
use crate::validation::{ExportBlocked, ValidationError};

use super::task_store::ExportTaskError;
use super::{ErrorCategory, ErrorSeverity, MAX_EXPORT_ATTEMPTS};

/// Errors that stop an export run.
///
/// Partial failures (attachments, links) are not errors; they become manual fixes.
#[derive(Debug, Error)]
pub enum ExportError {
    /// The validation gate refused the export.
    #[error("export blocked: {0}")]
    Blocked(#[from] ExportBlocked),

    /// The dependency graph contains a cycle.
    #[error("cannot order tickets: {0}")]
    Cycle(#[from] CycleError),

    /// Another export of the same ticket set is in progress.
    #[error("an export of ticket set {0} is already running")]
    AlreadyRunning(String),

    /// All attempts of the run record were used up.
    #[error(
        "export of ticket set {ticket_set_id} failed {retry_count} times (limit {}); last error: {last_error}",
        MAX_EXPORT_ATTEMPTS
    )]
    RetryBudgetExhausted {
        ticket_set_id: String,
        retry_count: u32,
        last_error: String,
    },

    /// `retry` was requested for a record that is not failed.
    #[error("ticket set {ticket_set_id} cannot be retried while {status}")]
    NotRetryable {
        ticket_set_id: String,
        status: String,
    },

    /// No run record exists for the ticket set.
    #[error("no export found for ticket set {0}")]
    TaskNotFound(String),

    /// The external tracker rejected a ticket creation.
    #[error("failed to create ticket {ticket_id} (position {index}): {source}")]
    Client {
        index: usize,
        ticket_id: String,
        #[source]
        source: ExternalError,
    },

    #[error("ticket store error: {0}")]
    Ticket(#[from] TicketError),

    #[error("validation store error: {0}")]
    Validation(#[from] ValidationError),

    #[error("export task store error: {0}")]
    Task(String),

    /// Internal guard against an illegal phase change.
    #[error("illegal export phase transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl From<ExportTaskError> for ExportError {
    fn from(e: ExportTaskError) -> Self {
        match e {
            ExportTaskError::AlreadyRunning(set) => ExportError::AlreadyRunning(set),
            ExportTaskError::NotFound(set) => ExportError::TaskNotFound(set),
            ExportTaskError::RetryBudgetExhausted {
                ticket_set_id,
                retry_count,
                last_error,
            } => ExportError::RetryBudgetExhausted {
                ticket_set_id,
                retry_count,
                last_error,
            },
            other => ExportError::Task(other.to_string()),
        }
    }
}

impl ExportError {
    /// Who can resolve the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ExportError::Blocked(_)
            | ExportError::Cycle(_)
            | ExportError::NotRetryable { .. }
            | ExportError::TaskNotFound(_) => ErrorCategory::UserFixable,
            ExportError::AlreadyRunning(_) => ErrorCategory::Temporary,
            ExportError::Client { source, .. } => {
                if source.is_auth() {
                    ErrorCategory::AdminRequired
                } else if source.is_transient() {
                    ErrorCategory::Temporary
                } else {
                    ErrorCategory::UserFixable
                }
            }
            ExportError::RetryBudgetExhausted { .. }
            | ExportError::Ticket(_)
            | ExportError::Validation(_)
            | ExportError::Task(_)
            | ExportError::InvalidTransition { .. } => ErrorCategory::AdminRequired,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ExportError::AlreadyRunning(_) | ExportError::NotRetryable { .. } => {
                ErrorSeverity::Warning
            }
            _ => ErrorSeverity::Blocking,
        }
    }

    /// Whether an automatic retry of the same run may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExportError::Client { source, .. } if source.is_transient())
    }
}
