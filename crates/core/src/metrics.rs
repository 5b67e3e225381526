//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Export runs (attempts, outcomes, durations)
//! - Tickets created and manual fixes recorded
//! - External tracker calls

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Export Metrics
// =============================================================================

/// Export runs finished, by terminal status.
pub static EXPORT_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tessera_export_runs_total", "Total export runs by outcome"),
        &["status"], // "completed", "failed", "cancelled", "blocked"
    )
    .unwrap()
});

/// Export attempts, including automatic retries.
pub static EXPORT_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tessera_export_attempts_total",
        "Total export attempts including automatic retries",
    )
    .unwrap()
});

/// Wall time of an export call from claim to terminal state.
pub static EXPORT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tessera_export_duration_seconds",
            "Duration of export runs",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["status"],
    )
    .unwrap()
});

/// Tickets created in the external tracker.
pub static TICKETS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tessera_tickets_created_total",
        "Total tickets created in the external tracker",
    )
    .unwrap()
});

/// Oversized bodies shipped as attachments.
pub static BODIES_TRUNCATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "tessera_bodies_truncated_total",
        "Total ticket bodies truncated in favour of an attachment",
    )
    .unwrap()
});

/// Manual fixes recorded, by fix type.
pub static MANUAL_FIXES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("tessera_manual_fixes_total", "Total manual fixes recorded"),
        &["fix_type"], // "attachment_upload", "dependency_link"
    )
    .unwrap()
});

// =============================================================================
// External Tracker Metrics
// =============================================================================

/// External tracker call duration.
pub static EXTERNAL_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "tessera_external_call_duration_seconds",
            "Duration of external tracker calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["operation"], // "create_ticket", "upload_attachment", "create_link"
    )
    .unwrap()
});

/// External tracker calls by outcome.
pub static EXTERNAL_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tessera_external_calls_total",
            "Total external tracker calls",
        ),
        &["operation", "status"], // status: "success", "transient", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Export
        Box::new(EXPORT_RUNS.clone()),
        Box::new(EXPORT_ATTEMPTS.clone()),
        Box::new(EXPORT_DURATION.clone()),
        Box::new(TICKETS_CREATED.clone()),
        Box::new(BODIES_TRUNCATED.clone()),
        Box::new(MANUAL_FIXES.clone()),
        // External tracker
        Box::new(EXTERNAL_CALL_DURATION.clone()),
        Box::new(EXTERNAL_CALLS.clone()),
    ]
}
