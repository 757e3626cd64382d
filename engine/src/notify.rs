//! Collaborator contracts: change notification and audit emission.
//!
//! Both are fire-and-forget from the engine's point of view. Change events
//! fan out over a broadcast channel to subscription machinery outside the
//! core; audit events go to a bounded queue whose overflow is logged and
//! dropped — delivery failures never fail the primary operation.

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub resource_type: String,
    pub id: String,
    pub version_id: i32,
    pub kind: ChangeKind,
}

/// Publishes committed writes to any number of subscribers.
#[derive(Clone)]
pub struct ChangeNotifier {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Publish after commit. Having no subscribers is not an error.
    pub fn publish(&self, event: ChangeEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// The interaction an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Search,
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    /// Opaque principal handle passed through from the auth collaborator.
    pub actor: Option<String>,
    pub resource_reference: String,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, resource_reference: impl Into<String>, success: bool) -> Self {
        Self {
            action,
            actor: None,
            resource_reference: resource_reference.into(),
            success,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Non-blocking audit sink backed by a bounded queue.
#[derive(Clone)]
pub struct AuditSink {
    sender: mpsc::Sender<AuditEvent>,
}

impl AuditSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Enqueue an event; a full or closed queue only warns.
    pub fn emit(&self, event: AuditEvent) {
        if let Err(e) = self.sender.try_send(event) {
            tracing::warn!("Dropping audit event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn change_events_reach_subscribers() {
        let notifier = ChangeNotifier::default();
        let mut receiver = notifier.subscribe();
        notifier.publish(ChangeEvent {
            resource_type: "Patient".into(),
            id: "p1".into(),
            version_id: 1,
            kind: ChangeKind::Create,
        });
        let event = receiver.recv().await.unwrap();
        assert_eq!(event.id, "p1");
        assert_eq!(event.kind, ChangeKind::Create);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_fine() {
        let notifier = ChangeNotifier::default();
        notifier.publish(ChangeEvent {
            resource_type: "Patient".into(),
            id: "p1".into(),
            version_id: 1,
            kind: ChangeKind::Delete,
        });
    }

    #[tokio::test]
    async fn audit_overflow_never_blocks() {
        let (sink, mut receiver) = AuditSink::new(1);
        sink.emit(AuditEvent::new(AuditAction::Read, "Patient/p1", true));
        // Queue is full; the second emit drops with a warning.
        sink.emit(AuditEvent::new(AuditAction::Read, "Patient/p2", true));
        let first = receiver.recv().await.unwrap();
        assert_eq!(first.resource_reference, "Patient/p1");
    }
}
