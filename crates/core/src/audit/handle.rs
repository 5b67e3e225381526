use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, error::TrySendError};

use super::AuditEvent;

/// An event stamped with the time it was emitted, not the time it was stored.
#[derive(Debug, Clone)]
pub struct AuditEventEnvelope {
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
}

impl AuditEventEnvelope {
    fn now(event: AuditEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Cloneable sender side of the audit trail.
///
/// Recording is best effort: nothing a request or an export does waits on the
/// audit store or fails because of it.
#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditEventEnvelope>,
}

impl AuditHandle {
    pub fn new(tx: mpsc::Sender<AuditEventEnvelope>) -> Self {
        Self { tx }
    }

    /// Queue an event from async code, waiting while the buffer is full.
    pub async fn emit(&self, event: AuditEvent) {
        let event_type = event.event_type();
        if self.tx.send(AuditEventEnvelope::now(event)).await.is_err() {
            tracing::error!(event_type, "Audit writer is gone; event dropped");
        }
    }

    /// Queue an event from a request handler without waiting.
    ///
    /// Returns false if the event was dropped.
    pub fn try_emit(&self, event: AuditEvent) -> bool {
        let event_type = event.event_type();
        match self.tx.try_send(AuditEventEnvelope::now(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(event_type, "Audit buffer full; event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::error!(event_type, "Audit writer is gone; event dropped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(to: &str) -> AuditEvent {
        AuditEvent::DependencyRejected {
            ticket_set_id: "set-1".to_string(),
            from: "t-1".to_string(),
            to: to.to_string(),
            reason: "would create a cycle".to_string(),
        }
    }

    #[tokio::test]
    async fn test_emit_stamps_and_queues_event() {
        let (tx, mut rx) = mpsc::channel(10);
        let handle = AuditHandle::new(tx);

        let before = Utc::now();
        handle.emit(rejected("t-2")).await;

        let envelope = rx.recv().await.expect("Should receive event");
        assert_eq!(envelope.event.event_type(), "dependency_rejected");
        assert!(envelope.timestamp >= before && envelope.timestamp <= Utc::now());
    }

    #[tokio::test]
    async fn test_clones_feed_one_writer_in_order() {
        let (tx, mut rx) = mpsc::channel(10);
        let api = AuditHandle::new(tx);
        let orchestrator = api.clone();

        api.emit(rejected("t-2")).await;
        orchestrator
            .emit(AuditEvent::ServiceStopped {
                reason: "test".to_string(),
            })
            .await;

        let first = rx.recv().await.expect("Should receive first event");
        let second = rx.recv().await.expect("Should receive second event");
        assert!(matches!(first.event, AuditEvent::DependencyRejected { .. }));
        assert!(matches!(second.event, AuditEvent::ServiceStopped { .. }));
    }

    #[test]
    fn test_try_emit_drops_when_buffer_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = AuditHandle::new(tx);

        assert!(handle.try_emit(rejected("t-2")));
        assert!(!handle.try_emit(rejected("t-3")));

        let kept = rx.try_recv().expect("first event is kept");
        assert!(matches!(kept.event, AuditEvent::DependencyRejected { ref to, .. } if to == "t-2"));
    }

    #[tokio::test]
    async fn test_writer_gone_is_not_an_error_for_callers() {
        let (tx, rx) = mpsc::channel::<AuditEventEnvelope>(10);
        let handle = AuditHandle::new(tx);
        drop(rx);

        handle.emit(rejected("t-2")).await;
        assert!(!handle.try_emit(rejected("t-2")));
    }
}
