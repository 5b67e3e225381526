//! Validation record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content-validation state of a ticket set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationRecord {
    /// Ticket set the record belongs to.
    pub ticket_set_id: String,
    /// Whether the last validation run passed.
    pub passed: bool,
    /// When validation last completed successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_validated_at: Option<DateTime<Utc>>,
    /// When validated content was last edited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_invalidated_at: Option<DateTime<Utc>>,
    /// Opaque results produced by the validator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
}

impl ValidationRecord {
    /// A record for a set that has never been validated.
    pub fn new(ticket_set_id: impl Into<String>) -> Self {
        Self {
            ticket_set_id: ticket_set_id.into(),
            passed: false,
            last_validated_at: None,
            last_invalidated_at: None,
            results: None,
        }
    }

    /// Record a completed validation run.
    ///
    /// Only a passing run moves `last_validated_at`.
    pub fn mark_completed(&mut self, passed: bool, at: DateTime<Utc>, results: serde_json::Value) {
        self.passed = passed;
        if passed {
            self.last_validated_at = Some(at);
        }
        self.results = Some(results);
    }

    /// Record a validation run that could not complete.
    pub fn mark_failed(&mut self, error_context: serde_json::Value) {
        self.passed = false;
        self.results = Some(error_context);
    }

    /// Record an edit to validated content.
    pub fn invalidate(&mut self, at: DateTime<Utc>) {
        self.passed = false;
        self.last_invalidated_at = Some(at);
    }

    /// Age of the last successful validation in minutes.
    pub fn validation_age_minutes(&self, now: DateTime<Utc>) -> Option<f64> {
        self.last_validated_at
            .map(|at| (now - at).num_milliseconds() as f64 / 60_000.0)
    }
}
