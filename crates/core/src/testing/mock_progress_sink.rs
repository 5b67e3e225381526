//! Progress sinks for testing.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::export::{ProgressSink, ProgressUpdate, SinkError};

/// Sink that keeps every update for later assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingProgressSink {
    updates: Arc<RwLock<Vec<ProgressUpdate>>>,
}

impl RecordingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All updates received, in order.
    pub async fn updates(&self) -> Vec<ProgressUpdate> {
        self.updates.read().await.clone()
    }

    /// Stage labels received, in order.
    pub async fn stages(&self) -> Vec<String> {
        self.updates
            .read()
            .await
            .iter()
            .map(|u| u.stage.clone())
            .collect()
    }

    /// The most recent update, if any.
    pub async fn last(&self) -> Option<ProgressUpdate> {
        self.updates.read().await.last().cloned()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgressSink {
    async fn publish(&self, update: ProgressUpdate) -> Result<(), SinkError> {
        self.updates.write().await.push(update);
        Ok(())
    }
}

/// Sink that rejects every update.
#[derive(Debug, Default)]
pub struct FailingProgressSink {
    attempts: AtomicUsize,
}

impl FailingProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of publish calls received.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressSink for FailingProgressSink {
    async fn publish(&self, _update: ProgressUpdate) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Other("subscriber went away".to_string()))
    }
}
