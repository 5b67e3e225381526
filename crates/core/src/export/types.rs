//! Types for the export orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attempts a single run record may consume before an operator has to step in.
pub const MAX_EXPORT_ATTEMPTS: u32 = 3;

/// Phase of an export run.
///
/// ```text
/// Idle -> Validating -> Ordering -> Exporting -> Completed
///            |             |           |-------> Cancelled
///            |-------------|-----------|-------> Failed
/// Failed | Cancelled | Completed -> Validating   (next attempt or new run)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportPhase {
    Idle,
    Validating,
    Ordering,
    Exporting,
    Completed,
    Failed,
    Cancelled,
}

impl ExportPhase {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: ExportPhase) -> bool {
        use ExportPhase::*;
        matches!(
            (self, next),
            (Idle, Validating)
                | (Validating, Ordering)
                | (Validating, Failed)
                | (Validating, Cancelled)
                | (Ordering, Exporting)
                | (Ordering, Failed)
                | (Ordering, Cancelled)
                | (Exporting, Completed)
                | (Exporting, Failed)
                | (Exporting, Cancelled)
                | (Failed, Validating)
                | (Cancelled, Validating)
                | (Completed, Validating)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportPhase::Completed | ExportPhase::Failed | ExportPhase::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportPhase::Idle => "idle",
            ExportPhase::Validating => "validating",
            ExportPhase::Ordering => "ordering",
            ExportPhase::Exporting => "exporting",
            ExportPhase::Completed => "completed",
            ExportPhase::Failed => "failed",
            ExportPhase::Cancelled => "cancelled",
        }
    }
}

/// Persisted status of a run record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportStatus::Running => "running",
            ExportStatus::Completed => "completed",
            ExportStatus::Failed => "failed",
            ExportStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExportStatus::Running),
            "completed" => Some(ExportStatus::Completed),
            "failed" => Some(ExportStatus::Failed),
            "cancelled" => Some(ExportStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who can resolve an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The person preparing the ticket set (fix content, dependencies, re-validate).
    UserFixable,
    /// An administrator (credentials, permissions, storage).
    AdminRequired,
    /// Nobody; trying again later may succeed.
    Temporary,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserFixable => "user_fixable",
            ErrorCategory::AdminRequired => "admin_required",
            ErrorCategory::Temporary => "temporary",
        }
    }
}

/// How an error should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Blocking,
    Warning,
}

/// Where the last failed attempt stopped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureContext {
    /// Index (in export order) of the last ticket processed successfully.
    pub last_ticket_index: Option<usize>,
    /// External keys created or already present at the time of failure, in export order.
    pub processed_keys: Vec<String>,
    pub error: String,
    pub category: ErrorCategory,
    /// Ticket whose processing failed, when the failure was ticket-specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_ticket_id: Option<String>,
}

/// One run record per ticket set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportTaskState {
    pub ticket_set_id: String,
    /// Identifier of the current run; changes when a completed set is exported again.
    pub task_id: String,
    pub status: ExportStatus,
    /// Failed attempts so far within this run.
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_context: Option<FailureContext>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl ExportTaskState {
    /// A fresh running record.
    pub fn new(ticket_set_id: impl Into<String>) -> Self {
        Self {
            ticket_set_id: ticket_set_id.into(),
            task_id: uuid::Uuid::new_v4().to_string(),
            status: ExportStatus::Running,
            retry_count: 0,
            failure_context: None,
            started_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }

    /// Whether another attempt is allowed by the retry budget.
    pub fn has_budget(&self) -> bool {
        self.retry_count < MAX_EXPORT_ATTEMPTS
    }

    /// Whether an operator may retry this record now.
    pub fn can_retry(&self) -> bool {
        self.status == ExportStatus::Failed && self.has_budget()
    }

    /// Record a failed attempt that counts against the budget and release the set.
    pub fn mark_failed(&mut self, context: FailureContext) {
        self.record_failed_attempt(context);
        self.status = ExportStatus::Failed;
    }

    /// Record a failed attempt that counts against the budget while the run
    /// keeps its claim on the set, so no other run starts during the backoff.
    pub fn record_failed_attempt(&mut self, context: FailureContext) {
        self.retry_count += 1;
        self.failure_context = Some(context);
        self.failed_at = Some(Utc::now());
    }

    /// Release the set after the last recorded attempt failed for good.
    pub fn release_failed(&mut self) {
        self.status = ExportStatus::Failed;
    }

    /// Record a failure that happened before any external call (gate or ordering).
    ///
    /// Does not consume budget.
    pub fn mark_blocked(&mut self, context: FailureContext) {
        self.status = ExportStatus::Failed;
        self.failure_context = Some(context);
        self.failed_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = ExportStatus::Completed;
        self.failure_context = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.status = ExportStatus::Cancelled;
    }

    /// Put the record back into `running` for the next attempt.
    pub fn resume(&mut self) {
        self.status = ExportStatus::Running;
    }
}

/// Outcome of one `export` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSummary {
    pub ticket_set_id: String,
    pub task_id: String,
    pub status: ExportStatus,
    /// Export-ready tickets in the set.
    pub total: usize,
    /// Tickets created in the external tracker during this call.
    pub created: usize,
    /// Tickets skipped because they already had an external key.
    pub skipped: usize,
    /// Manual fixes recorded during this call.
    pub manual_fixes: usize,
    /// Attempts made during this call.
    pub attempts: u32,
}
