//! Audit event types.
//!
//! An event is an immutable fact about a past state change. Every
//! mutation of group, entity, or relationship state emits exactly one
//! event in the same atomic unit; externally-originated facts arrive
//! through webhook ingestion. Each event is content-hashed with BLAKE3
//! so tampering with a persisted log is detectable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ActorId, GroupId};

/// Unique identifier for an audit event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Well-known event type tags emitted by the store itself.
///
/// Externally-ingested facts use `external.<source>` instead; the set is
/// open-ended by design.
pub mod kind {
    pub const GROUP_CREATED: &str = "group.created";
    pub const GROUP_STATUS_CHANGED: &str = "group.statusChanged";
    pub const GROUP_PARENT_CHANGED: &str = "group.parentChanged";
    pub const GROUP_ROLE_GRANTED: &str = "group.roleGranted";
    pub const ENTITY_CREATED: &str = "entity.created";
    pub const ENTITY_UPDATED: &str = "entity.updated";
    pub const ENTITY_STATUS_CHANGED: &str = "entity.statusChanged";
    pub const RELATIONSHIP_CONNECTED: &str = "relationship.connected";
    pub const RELATIONSHIP_DISCONNECTED: &str = "relationship.disconnected";
    pub const RELATIONSHIP_REORDERED: &str = "relationship.reordered";
    pub const KNOWLEDGE_LABELS_ATTACHED: &str = "knowledge.labelsAttached";
    pub const KNOWLEDGE_EMBEDDING_UPSERTED: &str = "knowledge.embeddingUpserted";
    pub const ACCESS_ASSIGNED: &str = "access.assigned";
}

/// An immutable audit fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: EventId,
    /// Dotted past-tense fact tag, e.g. `entity.created`.
    pub event_type: String,
    pub actor_id: ActorId,
    /// Id of the mutated record, when one exists.
    pub target_id: Option<Uuid>,
    /// Tenant scope of the fact; `None` for platform-level facts.
    pub group_id: Option<GroupId>,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
    /// Caller-supplied deduplication key for externally-ingested facts.
    pub idempotency_key: Option<String>,
    /// BLAKE3 content hash (hex) — set when the event is sealed.
    pub content_hash: Option<String>,
}

impl Event {
    /// Build an unsealed event stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        actor_id: ActorId,
        target_id: Option<Uuid>,
        group_id: Option<GroupId>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type: event_type.into(),
            actor_id,
            target_id,
            group_id,
            timestamp: Utc::now(),
            metadata,
            idempotency_key: None,
            content_hash: None,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Compute the BLAKE3 hash over all fields except `content_hash`.
    pub fn compute_hash(&self) -> String {
        compute_event_hash(self)
    }

    /// Seal the event: stamp the commit time and set the content hash.
    pub fn seal(mut self, committed_at: DateTime<Utc>) -> Self {
        self.timestamp = committed_at;
        self.content_hash = Some(self.compute_hash());
        self
    }

    /// Verify that the stored content hash matches a freshly computed one.
    pub fn verify_integrity(&self) -> bool {
        match &self.content_hash {
            Some(stored) => stored == &self.compute_hash(),
            None => false,
        }
    }
}

/// Hashable representation of an event (excludes content_hash).
#[derive(Serialize)]
struct HashableEvent<'a> {
    id: &'a EventId,
    event_type: &'a str,
    actor_id: &'a ActorId,
    target_id: &'a Option<Uuid>,
    group_id: &'a Option<GroupId>,
    timestamp: &'a DateTime<Utc>,
    metadata: &'a serde_json::Value,
    idempotency_key: &'a Option<String>,
}

fn compute_event_hash(event: &Event) -> String {
    let hashable = HashableEvent {
        id: &event.id,
        event_type: &event.event_type,
        actor_id: &event.actor_id,
        target_id: &event.target_id,
        group_id: &event.group_id,
        timestamp: &event.timestamp,
        metadata: &event.metadata,
        idempotency_key: &event.idempotency_key,
    };

    let json = serde_json::to_vec(&hashable).expect("Event serialization should not fail");
    blake3::hash(&json).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event::new(
            kind::ENTITY_CREATED,
            ActorId::new(),
            Some(Uuid::new_v4()),
            Some(GroupId::new()),
            serde_json::json!({"entity_type": "funnel"}),
        )
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = sample_event().seal(Utc::now());
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, deserialized.id);
        assert!(deserialized.verify_integrity());
    }

    #[test]
    fn sealed_event_detects_tampering() {
        let mut event = sample_event().seal(Utc::now());
        assert!(event.verify_integrity());

        event.event_type = "entity.deleted".to_string();
        assert!(!event.verify_integrity());
    }

    #[test]
    fn unsealed_event_never_verifies() {
        assert!(!sample_event().verify_integrity());
    }

    #[test]
    fn idempotency_key_participates_in_hash() {
        let base = sample_event();
        let a = base.clone().seal(base.timestamp);
        let b = base.clone().with_idempotency_key("shopify:order-1").seal(base.timestamp);
        assert_ne!(a.content_hash, b.content_hash);
    }
}
