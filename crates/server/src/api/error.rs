//! JSON error responses for API handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tessera_core::{
    audit::AuditError, export::ExportTaskError, manual_fix::ManualFixError,
    validation::ValidationError, ExportError, TicketError,
};

/// Error body: `{"error": "...", "category": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<&'static str>,
}

/// An error ready to be turned into an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub category: Option<&'static str>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            category: None,
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn conflict(error: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, error)
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// No external tracker is configured, so nothing can be exported.
    pub fn tracker_unavailable() -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            error: "no external tracker is configured; add a [jira] section".to_string(),
            category: Some("admin_required"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.error,
                category: self.category,
            }),
        )
            .into_response()
    }
}

impl From<ExportError> for ApiError {
    fn from(e: ExportError) -> Self {
        let status = match &e {
            ExportError::Blocked(_) | ExportError::Cycle(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ExportError::AlreadyRunning(_)
            | ExportError::NotRetryable { .. }
            | ExportError::RetryBudgetExhausted { .. } => StatusCode::CONFLICT,
            ExportError::TaskNotFound(_) => StatusCode::NOT_FOUND,
            ExportError::Client { .. } if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            ExportError::Client { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ExportError::Ticket(_)
            | ExportError::Validation(_)
            | ExportError::Task(_)
            | ExportError::InvalidTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            category: Some(e.category().as_str()),
            error: e.to_string(),
        }
    }
}

impl From<TicketError> for ApiError {
    fn from(e: TicketError) -> Self {
        match e {
            TicketError::NotFound(_) => ApiError::not_found(e.to_string()),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<ExportTaskError> for ApiError {
    fn from(e: ExportTaskError) -> Self {
        ApiError::from(ExportError::from(e))
    }
}

impl From<ManualFixError> for ApiError {
    fn from(e: ManualFixError) -> Self {
        ApiError::internal(e.to_string())
    }
}

impl From<AuditError> for ApiError {
    fn from(e: AuditError) -> Self {
        ApiError::internal(e.to_string())
    }
}
