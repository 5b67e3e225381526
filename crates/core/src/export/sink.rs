//! Progress reporting for running exports.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// A progress update for one ticket set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub ticket_set_id: String,
    /// 0.0 to 100.0
    pub percentage: f32,
    /// Human-readable stage label.
    pub stage: String,
    /// Free-form details (current title, exported count, total, manual fixes).
    #[serde(default)]
    pub details: BTreeMap<String, serde_json::Value>,
}

impl ProgressUpdate {
    pub fn new(ticket_set_id: impl Into<String>, percentage: f32, stage: impl Into<String>) -> Self {
        Self {
            ticket_set_id: ticket_set_id.into(),
            percentage: percentage.clamp(0.0, 100.0),
            stage: stage.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("progress sink closed")]
    Closed,

    #[error("progress sink error: {0}")]
    Other(String),
}

/// Receiver of progress updates.
///
/// Publishing is fire-and-forget for the export: a failing sink is logged and ignored.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn publish(&self, update: ProgressUpdate) -> Result<(), SinkError>;
}

/// Sink that logs each update.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

#[async_trait]
impl ProgressSink for TracingProgressSink {
    async fn publish(&self, update: ProgressUpdate) -> Result<(), SinkError> {
        tracing::info!(
            ticket_set_id = %update.ticket_set_id,
            percentage = update.percentage,
            stage = %update.stage,
            "Export progress"
        );
        Ok(())
    }
}

/// Sink that fans updates out to any number of subscribers (e.g. WebSocket clients).
#[derive(Clone)]
pub struct BroadcastProgressSink {
    tx: broadcast::Sender<ProgressUpdate>,
}

impl BroadcastProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl ProgressSink for BroadcastProgressSink {
    async fn publish(&self, update: ProgressUpdate) -> Result<(), SinkError> {
        // Nobody listening is not an error.
        let _ = self.tx.send(update);
        Ok(())
    }
}
