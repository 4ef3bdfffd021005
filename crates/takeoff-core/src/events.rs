//! Suggestion lifecycle events, envelope schema, and event bus.
//!
//! The suggestion store emits one event per create / approve / reject. Events
//! are wrapped in a versioned [`EventEnvelope`] and broadcast through the
//! [`EventBus`]; downstream consumers (webhooks, committers, telemetry)
//! subscribe independently. Transport beyond the in-process broadcast channel
//! belongs to the subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::SuggestionStatus;

// ============================================================================
// Event Envelope
// ============================================================================

/// Actor metadata for event attribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventActor {
    /// Actor type: `"system"` or `"user"`.
    pub kind: String,
    /// Optional actor identifier (reviewer name, service id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EventActor {
    /// System actor (orchestrator, background aggregation).
    pub fn system() -> Self {
        Self {
            kind: "system".to_string(),
            id: None,
        }
    }

    /// Human reviewer.
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            kind: "user".to_string(),
            id: Some(id.into()),
        }
    }
}

/// Versioned event envelope.
///
/// `event_type` uses dot-namespaced names (`"suggestion.created"`); the
/// `payload` carries the domain event.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type.
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Who/what caused this event.
    pub actor: EventActor,
    /// Type of entity this event relates to.
    pub entity_type: String,
    /// ID of the entity this event relates to.
    pub entity_id: String,
    /// Payload schema version.
    pub payload_version: u32,
    /// Domain-specific event data.
    pub payload: SuggestionEvent,
}

impl EventEnvelope {
    /// Wrap an event, attributing it to the reviewer when there is one.
    pub fn new(event: SuggestionEvent) -> Self {
        let actor = event
            .reviewed_by()
            .map(EventActor::user)
            .unwrap_or_else(EventActor::system);

        Self {
            event_id: crate::uuid_utils::new_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            actor,
            entity_type: "suggestion".to_string(),
            entity_id: event.suggestion_id().to_string(),
            payload_version: 1,
            payload: event,
        }
    }
}

// ============================================================================
// Suggestion Event (domain payloads)
// ============================================================================

/// Notification emitted on every suggestion state change.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"SuggestionCreated","suggestion_id":"...","fingerprint":"...","status":"pending"}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum SuggestionEvent {
    SuggestionCreated {
        suggestion_id: Uuid,
        fingerprint: Option<String>,
        status: SuggestionStatus,
    },
    SuggestionApproved {
        suggestion_id: Uuid,
        fingerprint: Option<String>,
        status: SuggestionStatus,
        reviewed_by: String,
    },
    SuggestionRejected {
        suggestion_id: Uuid,
        fingerprint: Option<String>,
        status: SuggestionStatus,
        reviewed_by: String,
        reason: String,
    },
}

impl SuggestionEvent {
    /// Dot-namespaced event type.
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            Self::SuggestionCreated { .. } => "suggestion.created",
            Self::SuggestionApproved { .. } => "suggestion.approved",
            Self::SuggestionRejected { .. } => "suggestion.rejected",
        }
    }

    pub fn suggestion_id(&self) -> Uuid {
        match self {
            Self::SuggestionCreated { suggestion_id, .. }
            | Self::SuggestionApproved { suggestion_id, .. }
            | Self::SuggestionRejected { suggestion_id, .. } => *suggestion_id,
        }
    }

    pub fn fingerprint(&self) -> Option<&str> {
        match self {
            Self::SuggestionCreated { fingerprint, .. }
            | Self::SuggestionApproved { fingerprint, .. }
            | Self::SuggestionRejected { fingerprint, .. } => fingerprint.as_deref(),
        }
    }

    pub fn status(&self) -> SuggestionStatus {
        match self {
            Self::SuggestionCreated { status, .. }
            | Self::SuggestionApproved { status, .. }
            | Self::SuggestionRejected { status, .. } => *status,
        }
    }

    pub fn reviewed_by(&self) -> Option<&str> {
        match self {
            Self::SuggestionCreated { .. } => None,
            Self::SuggestionApproved { reviewed_by, .. }
            | Self::SuggestionRejected { reviewed_by, .. } => Some(reviewed_by),
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast bus for suggestion events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers.
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub fn emit(&self, event: SuggestionEvent) {
        let envelope = EventEnvelope::new(event);
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count,
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    /// Emit every event in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = SuggestionEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Subscribe to receive enveloped events.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

// ============================================================================
// Tests
// ============================================================================
