//! The unit of work behind every mutation.
//!
//! A mutation method validates everything it needs up front, stages its
//! record writes as changes, and emits exactly one audit event. Commit
//! is all-or-nothing: the idempotency check runs before any change is
//! applied, and a transaction without an event refuses to commit — the
//! event log is not best-effort.

use chrono::Utc;
use uuid::Uuid;

use strata_auth::Role;
use strata_core::{
    ActorId, Entity, EntityId, Event, Group, GroupId, Relationship, Result, StrataError,
};
use strata_knowledge::EmbeddingUpsert;

use crate::store::StoreInner;

/// A staged record write. Application is infallible: all validation
/// happened before staging, under the same writer lock.
pub(crate) enum Change {
    PutGroup(Group),
    PutEntity(Entity),
    PutRelation(Relationship),
    SetOrderingVersion {
        parent: EntityId,
        relation_type: String,
        version: u64,
    },
    PutMembership {
        actor: ActorId,
        group: GroupId,
        role: Role,
    },
    PutAssignment {
        actor: ActorId,
        resource: Uuid,
    },
    AttachLabels {
        group: GroupId,
        entity: EntityId,
        labels: Vec<String>,
    },
    UpsertEmbedding(EmbeddingUpsert),
}

pub(crate) struct Txn {
    operation: &'static str,
    changes: Vec<Change>,
    event: Option<Event>,
}

impl Txn {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            changes: Vec::new(),
            event: None,
        }
    }

    pub fn stage(&mut self, change: Change) {
        self.changes.push(change);
    }

    /// Attach the single audit event for this mutation.
    pub fn emit(&mut self, event: Event) {
        debug_assert!(self.event.is_none(), "one event per mutation");
        self.event = Some(event);
    }

    /// Apply the staged changes and append the event atomically.
    ///
    /// Returns the sealed event — or, when the event carries an
    /// idempotency key that was already consumed, the original event,
    /// with every staged change dropped.
    pub fn commit(self, inner: &mut StoreInner) -> Result<Event> {
        let operation = self.operation;
        let event = self.event.ok_or_else(|| {
            StrataError::Internal(format!("mutation {operation} staged no audit event"))
        })?;

        if let Some(key) = &event.idempotency_key {
            if let Some(existing_id) = inner.idempotency_keys.get(key) {
                let existing = inner
                    .events_by_id
                    .get(existing_id)
                    .and_then(|&pos| inner.events.get(pos))
                    .cloned()
                    .ok_or_else(|| {
                        StrataError::Internal("idempotency key points at a missing event".to_string())
                    })?;
                tracing::debug!(operation, event_id = %existing.id, "Idempotent replay, nothing applied");
                return Ok(existing);
            }
        }

        for change in self.changes {
            apply(inner, change);
        }

        let event = event.seal(Utc::now());
        let event_id = event.id;
        inner.push_event(event.clone());

        tracing::debug!(operation, event_id = %event_id, "Mutation committed");
        Ok(event)
    }
}

fn apply(inner: &mut StoreInner, change: Change) {
    match change {
        Change::PutGroup(group) => inner.apply_put_group(group),
        Change::PutEntity(entity) => inner.apply_put_entity(entity),
        Change::PutRelation(relation) => inner.apply_put_relation(relation),
        Change::SetOrderingVersion {
            parent,
            relation_type,
            version,
        } => {
            inner.ordering_versions.insert((parent, relation_type), version);
        }
        Change::PutMembership { actor, group, role } => {
            inner.memberships.insert((actor, group), role);
        }
        Change::PutAssignment { actor, resource } => {
            inner.assignments.insert((actor, resource));
        }
        Change::AttachLabels {
            group,
            entity,
            labels,
        } => {
            inner.knowledge.attach_labels(group, entity, &labels);
        }
        Change::UpsertEmbedding(upsert) => {
            // Dimension and quota were checked before staging; a failure
            // here would be a logic error, not caller input.
            if let Err(e) = inner.knowledge.upsert_embedding(upsert) {
                tracing::error!(error = %e, "Pre-validated embedding upsert failed");
            }
        }
    }
}
