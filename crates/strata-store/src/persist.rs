//! JSON snapshot persistence.
//!
//! The snapshot holds primary records only; every secondary index is
//! rebuilt on load. Event integrity is re-verified against the stored
//! content hashes, so a tampered log refuses to load.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use strata_auth::Role;
use strata_core::config::StrataConfig;
use strata_core::{
    ActorId, Entity, EntityId, Event, Group, GroupId, KnowledgeRecord, Relationship, Result,
    StrataError,
};
use strata_knowledge::KnowledgeIndex;

use crate::schema::SchemaRegistry;
use crate::store::OntologyStore;

/// Serializable copy of the store's primary state.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    pub groups: Vec<Group>,
    pub entities: Vec<Entity>,
    pub relations: Vec<Relationship>,
    pub events: Vec<Event>,
    pub ordering_versions: Vec<OrderingVersion>,
    pub platform_roles: Vec<(ActorId, Role)>,
    pub memberships: Vec<Membership>,
    pub assignments: Vec<(ActorId, Uuid)>,
    pub knowledge: Vec<KnowledgeRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderingVersion {
    pub parent: EntityId,
    pub relation_type: String,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Membership {
    pub actor: ActorId,
    pub group: GroupId,
    pub role: Role,
}

impl OntologyStore {
    /// Capture the current state as a snapshot.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let inner = self.read()?;
        Ok(Snapshot {
            saved_at: Utc::now(),
            groups: inner.groups.values().cloned().collect(),
            entities: inner.entities.values().cloned().collect(),
            relations: inner.relations.values().cloned().collect(),
            events: inner.events.clone(),
            ordering_versions: inner
                .ordering_versions
                .iter()
                .map(|((parent, relation_type), version)| OrderingVersion {
                    parent: *parent,
                    relation_type: relation_type.clone(),
                    version: *version,
                })
                .collect(),
            platform_roles: inner
                .platform_roles
                .iter()
                .map(|(actor, role)| (*actor, *role))
                .collect(),
            memberships: inner
                .memberships
                .iter()
                .map(|((actor, group), role)| Membership {
                    actor: *actor,
                    group: *group,
                    role: *role,
                })
                .collect(),
            assignments: inner.assignments.iter().copied().collect(),
            knowledge: inner.knowledge.export(),
        })
    }

    /// Write a snapshot to `path`, creating parent directories.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let snapshot = self.snapshot()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, json)?;

        tracing::debug!(
            path = %path.display(),
            events = snapshot.events.len(),
            "Snapshot saved"
        );
        Ok(())
    }

    /// Load a snapshot file into a fresh store.
    pub fn load_snapshot(
        path: impl AsRef<Path>,
        config: StrataConfig,
        schemas: SchemaRegistry,
    ) -> Result<OntologyStore> {
        let json = fs::read_to_string(path.as_ref())?;
        let snapshot: Snapshot = serde_json::from_str(&json)?;
        Self::from_snapshot(config, schemas, snapshot)
    }

    /// Rebuild a store — records, indexes, knowledge postings — from a
    /// snapshot. Refuses events whose content hash no longer matches.
    pub fn from_snapshot(
        config: StrataConfig,
        schemas: SchemaRegistry,
        snapshot: Snapshot,
    ) -> Result<OntologyStore> {
        const OP: &str = "snapshot.load";

        let store = OntologyStore::with_schemas(config, schemas);
        {
            let mut inner = store.write()?;

            for group in snapshot.groups {
                inner.apply_put_group(group);
            }
            for entity in snapshot.entities {
                inner.apply_put_entity(entity);
            }
            for relation in snapshot.relations {
                inner.apply_put_relation(relation);
            }
            for event in snapshot.events {
                if !event.verify_integrity() {
                    return Err(StrataError::Validation {
                        operation: OP,
                        field: "events".to_string(),
                        message: format!("event {} failed its integrity check", event.id),
                    });
                }
                inner.push_event(event);
            }
            for ov in snapshot.ordering_versions {
                inner
                    .ordering_versions
                    .insert((ov.parent, ov.relation_type), ov.version);
            }
            for (actor, role) in snapshot.platform_roles {
                inner.platform_roles.insert(actor, role);
            }
            for membership in snapshot.memberships {
                inner
                    .memberships
                    .insert((membership.actor, membership.group), membership.role);
            }
            for assignment in snapshot.assignments {
                inner.assignments.insert(assignment);
            }
            inner.knowledge = KnowledgeIndex::import(snapshot.knowledge, Utc::now());
        }

        tracing::info!("Store restored from snapshot");
        Ok(store)
    }
}
