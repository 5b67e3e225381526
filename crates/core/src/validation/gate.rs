//! Export gate over the content-validation record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::ValidationRecord;

/// Why export is not allowed right now.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExportBlocked {
    /// No successful validation has ever been recorded.
    #[error("ticket content has never been validated; run validation before exporting")]
    NeverValidated,

    /// The last validation run did not pass.
    #[error("ticket content failed validation; fix the reported issues and validate again")]
    ValidationFailed,

    /// Content was edited at or after the last successful validation.
    #[error(
        "tickets were edited after the last successful validation ({validated_at}); validate again before exporting"
    )]
    Stale {
        validated_at: DateTime<Utc>,
        invalidated_at: DateTime<Utc>,
    },
}

/// Decide whether a ticket set may be exported.
///
/// Allowed only when the last run passed and the last successful validation
/// is strictly after the last invalidation (or nothing was ever invalidated).
/// Equal timestamps count as stale.
pub fn check_export_allowed(record: Option<&ValidationRecord>) -> Result<(), ExportBlocked> {
    let Some(record) = record else {
        return Err(ExportBlocked::NeverValidated);
    };

    let Some(validated_at) = record.last_validated_at else {
        return Err(if record.results.is_some() {
            ExportBlocked::ValidationFailed
        } else {
            ExportBlocked::NeverValidated
        });
    };

    if let Some(invalidated_at) = record.last_invalidated_at {
        if invalidated_at >= validated_at {
            return Err(ExportBlocked::Stale {
                validated_at,
                invalidated_at,
            });
        }
    }

    if !record.passed {
        return Err(ExportBlocked::ValidationFailed);
    }

    Ok(())
}
