//! Session lifecycle events.
//!
//! Events are a notification side channel, never the source of truth: they
//! publish after the state transition is durably recorded, at most once, best
//! effort. A publish failure must never fail the operation that triggered it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventKind {
    Issued,
    Refreshed,
    Revoked,
    SecurityAlert,
}

impl SessionEventKind {
    /// Bus subject the event is published to.
    #[must_use]
    pub fn subject(self) -> &'static str {
        match self {
            Self::Issued => "session.issued",
            Self::Refreshed => "session.refreshed",
            Self::Revoked => "session.revoked",
            Self::SecurityAlert => "session.security_alert",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub event: SessionEventKind,
    pub session_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<Uuid>,
    pub identity: String,
    pub at: i64,
    /// Alert detail, e.g. `refresh_reuse`. Security alerts only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &SessionEvent) -> Result<()>;
}

/// NATS-backed publisher. Fire-and-forget: the publish is buffered by the
/// client and not awaited for broker acknowledgment.
pub struct NatsEventPublisher {
    client: async_nats::Client,
}

impl NatsEventPublisher {
    #[must_use]
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl EventPublisher for NatsEventPublisher {
    async fn publish(&self, event: &SessionEvent) -> Result<()> {
        let payload = serde_json::to_vec(event).context("failed to serialize session event")?;
        self.client
            .publish(event.event.subject().to_string(), Bytes::from(payload))
            .await
            .context("failed to publish session event")?;
        Ok(())
    }
}

/// Log-only publisher used when no bus is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, event: &SessionEvent) -> Result<()> {
        info!(
            subject = event.event.subject(),
            session_id = %event.session_id,
            identity = %event.identity,
            "session event"
        );
        Ok(())
    }
}

/// Publisher that records events for inspection in tests.
#[derive(Default)]
pub struct CapturingEventPublisher {
    published: RwLock<Vec<SessionEvent>>,
}

impl CapturingEventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn published(&self) -> Vec<SessionEvent> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    #[must_use]
    pub fn published_to(&self, subject: &str) -> Vec<SessionEvent> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|event| event.event.subject() == subject)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn was_published_to(&self, subject: &str) -> bool {
        !self.published_to(subject).is_empty()
    }
}

#[async_trait]
impl EventPublisher for CapturingEventPublisher {
    async fn publish(&self, event: &SessionEvent) -> Result<()> {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: SessionEventKind) -> SessionEvent {
        SessionEvent {
            event: kind,
            session_id: Uuid::from_u128(1),
            chain_id: Some(Uuid::from_u128(2)),
            identity: "u1".to_string(),
            at: 1_700_000_000,
            reason: None,
        }
    }

    #[test]
    fn subjects_are_stable() {
        assert_eq!(SessionEventKind::Issued.subject(), "session.issued");
        assert_eq!(SessionEventKind::Refreshed.subject(), "session.refreshed");
        assert_eq!(SessionEventKind::Revoked.subject(), "session.revoked");
        assert_eq!(
            SessionEventKind::SecurityAlert.subject(),
            "session.security_alert"
        );
    }

    #[test]
    fn event_serializes_with_snake_case_kind() -> Result<()> {
        let json = serde_json::to_value(event(SessionEventKind::SecurityAlert))?;
        assert_eq!(json["event"], "security_alert");
        assert_eq!(json["identity"], "u1");
        assert!(json.get("reason").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn capturing_publisher_records_by_subject() -> Result<()> {
        let publisher = CapturingEventPublisher::new();
        publisher.publish(&event(SessionEventKind::Issued)).await?;
        publisher.publish(&event(SessionEventKind::Revoked)).await?;

        assert_eq!(publisher.published().len(), 2);
        assert!(publisher.was_published_to("session.issued"));
        assert!(!publisher.was_published_to("session.refreshed"));
        assert_eq!(publisher.published_to("session.revoked").len(), 1);
        Ok(())
    }
}
