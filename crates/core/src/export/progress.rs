//! Resume-point computation over ordered tickets.

use serde::Serialize;

use crate::ticket::TicketNode;

/// Split of an ordered ticket list into already-exported and remaining positions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumePoint {
    /// Positions of tickets that already carry an external key.
    pub done: Vec<usize>,
    /// Positions still to be created, in export order.
    pub remaining: Vec<usize>,
    pub total: usize,
}

impl ResumePoint {
    /// Fraction of tickets done, in `[0, 1]`. An empty list counts as complete.
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            1.0
        } else {
            self.done.len() as f32 / self.total as f32
        }
    }

    pub fn percent(&self) -> f32 {
        self.progress() * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

/// Tracks how far an ordered export has come.
pub struct ExportProgressTracker;

impl ExportProgressTracker {
    /// Partition `ordered` (already in export order) into done and remaining positions.
    ///
    /// A ticket with an external key is never scheduled again, wherever it sits in the order.
    pub fn compute_resume_point(ordered: &[TicketNode]) -> ResumePoint {
        let (done, remaining): (Vec<usize>, Vec<usize>) =
            (0..ordered.len()).partition(|&i| ordered[i].is_exported());

        ResumePoint {
            done,
            remaining,
            total: ordered.len(),
        }
    }
}
