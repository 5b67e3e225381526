use std::sync::Arc;

use tokio::sync::mpsc;

use super::{AuditEventEnvelope, AuditHandle, AuditRecord, AuditStore};

/// Most envelopes written in one transaction.
const WRITE_BATCH: usize = 64;

impl From<AuditEventEnvelope> for AuditRecord {
    fn from(envelope: AuditEventEnvelope) -> Self {
        AuditRecord {
            id: 0,
            timestamp: envelope.timestamp,
            event_type: envelope.event.event_type().to_string(),
            ticket_set_id: envelope.event.ticket_set_id().map(String::from),
            ticket_id: envelope.event.ticket_id().map(String::from),
            data: envelope.event,
        }
    }
}

/// Drains the audit channel into an [`AuditStore`].
///
/// Whatever is queued when the writer wakes up goes to the store as one
/// batch, so a burst of per-ticket events costs one transaction.
pub struct AuditWriter {
    rx: mpsc::Receiver<AuditEventEnvelope>,
    store: Arc<dyn AuditStore>,
}

impl AuditWriter {
    pub fn new(rx: mpsc::Receiver<AuditEventEnvelope>, store: Arc<dyn AuditStore>) -> Self {
        Self { rx, store }
    }

    /// Consume events until every `AuditHandle` has been dropped.
    pub async fn run(mut self) {
        tracing::info!("Audit writer started");

        let mut batch = Vec::with_capacity(WRITE_BATCH);
        while self.rx.recv_many(&mut batch, WRITE_BATCH).await > 0 {
            let records: Vec<AuditRecord> = batch.drain(..).map(AuditRecord::from).collect();
            if let Err(e) = self.store.append(&records) {
                tracing::error!(dropped = records.len(), "Failed to write audit events: {}", e);
            }
        }

        tracing::info!("Audit writer shutting down");
    }
}

/// Build the handle to clone into components and the writer to spawn with
/// `tokio::spawn(writer.run())`.
pub fn create_audit_system(
    store: Arc<dyn AuditStore>,
    buffer_size: usize,
) -> (AuditHandle, AuditWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (AuditHandle::new(tx), AuditWriter::new(rx, store))
}
