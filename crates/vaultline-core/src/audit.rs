//! Asynchronous audit dispatch.
//!
//! Every value-decrypting read and every mutation produces an
//! [`AuditEvent`] once its transaction has committed. Events are handed to an
//! [`AuditDispatcher`], which queues them on an unbounded channel and returns
//! immediately; a background worker delivers each event to every registered
//! [`AuditSink`], retrying failures with exponential backoff. Delivery is
//! at-least-once per sink and never blocks or fails the operation that
//! produced the event.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::AuditError;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "organization.create")]
    OrganizationCreate,
    #[serde(rename = "organization.kek_rotate")]
    KekRotate,
    #[serde(rename = "secret.create")]
    SecretCreate,
    #[serde(rename = "secret.read")]
    SecretRead,
    #[serde(rename = "secret.read_version")]
    SecretReadVersion,
    #[serde(rename = "secret.update")]
    SecretUpdate,
    #[serde(rename = "secret.list")]
    SecretList,
    #[serde(rename = "secret.delete")]
    SecretDelete,
    #[serde(rename = "secret.purge")]
    SecretPurge,
    #[serde(rename = "secret.rollback")]
    SecretRollback,
}

/// Kind of resource an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Organization,
    Secret,
}

/// A single audit record. Never carries secret values or key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub organization_id: Uuid,
    pub actor_id: Uuid,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
    pub resource_name: String,
    pub metadata: serde_json::Value,
}

impl AuditEvent {
    #[must_use]
    pub fn new(
        organization_id: Uuid,
        actor_id: Uuid,
        action: AuditAction,
        resource_type: ResourceType,
        resource_id: Uuid,
        resource_name: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            organization_id,
            actor_id,
            action,
            resource_type,
            resource_id,
            resource_name: resource_name.into(),
            metadata: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Destination for audit events.
///
/// `log` may be called more than once for the same event (retries), so
/// sinks that care about duplicates should key on [`AuditEvent::id`].
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    /// The sink's name (for error reporting).
    fn name(&self) -> &str;

    /// Persist one event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event could not be persisted.
    async fn log(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Retry policy for sink delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Total attempts per sink per event, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Non-blocking handle for emitting audit events.
///
/// Cheap to clone. The background worker exits once every handle has been
/// dropped and the queue is drained, so awaiting the [`JoinHandle`] returned
/// by [`spawn`](Self::spawn) after dropping all handles flushes the queue.
#[derive(Debug, Clone)]
pub struct AuditDispatcher {
    tx: Option<mpsc::UnboundedSender<AuditEvent>>,
}

impl AuditDispatcher {
    /// Start the delivery worker on the current tokio runtime.
    #[must_use]
    pub fn spawn(sinks: Vec<Arc<dyn AuditSink>>, policy: DeliveryPolicy) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(rx, sinks, policy));
        (Self { tx: Some(tx) }, worker)
    }

    /// A dispatcher that discards every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue an event for delivery. Never blocks and never fails.
    pub fn emit(&self, event: AuditEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.send(event) {
            warn!(
                event_id = %e.0.id,
                action = ?e.0.action,
                "audit worker has stopped; event dropped"
            );
        }
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<AuditEvent>,
    sinks: Vec<Arc<dyn AuditSink>>,
    policy: DeliveryPolicy,
) {
    while let Some(event) = rx.recv().await {
        for sink in &sinks {
            deliver(sink.as_ref(), &event, policy).await;
        }
    }
    debug!("audit queue drained; worker exiting");
}

async fn deliver(sink: &dyn AuditSink, event: &AuditEvent, policy: DeliveryPolicy) {
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;
    loop {
        match sink.log(event).await {
            Ok(()) => return,
            // Retrying cannot fix an event that does not serialize.
            Err(e @ AuditError::Serialization { .. }) => {
                error!(sink = sink.name(), event_id = %event.id, error = %e, "audit event dropped");
                return;
            }
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    sink = sink.name(),
                    event_id = %event.id,
                    attempt,
                    error = %e,
                    "audit delivery failed; retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(e) => {
                error!(
                    sink = sink.name(),
                    event_id = %event.id,
                    attempts = attempt,
                    error = %e,
                    "audit delivery abandoned"
                );
                return;
            }
        }
    }
}
