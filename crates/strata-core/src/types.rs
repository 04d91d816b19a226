//! Core domain types for the Strata ontology store.
//!
//! The ontology has five dimensions — groups, entities, relationships,
//! events, and knowledge — shared across every Strata service. Entity and
//! relationship types are open string tags, not enums: new domain types
//! are introduced at runtime without a schema migration.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identifiers ───────────────────────────────────────────────────

/// Identifier of a tenant-scoping group.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an entity ("thing") in the ontology.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct EntityId(pub Uuid);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a relationship ("connection") between two entities.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct RelationId(pub Uuid);

impl RelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a knowledge record (label set or embedded chunk).
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct KnowledgeId(pub Uuid);

impl KnowledgeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for KnowledgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for KnowledgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an actor (person or service principal) issuing calls.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Explicit caller identity passed to every store call.
///
/// There is no ambient "current actor" state anywhere in Strata: whoever
/// holds an `ActorContext` is the one acted for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActorContext {
    pub actor: ActorId,
}

impl ActorContext {
    pub fn new(actor: ActorId) -> Self {
        Self { actor }
    }
}

// ── Groups ────────────────────────────────────────────────────────

/// Lifecycle status of a group. Groups are archived, never hard-deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    Active,
    Inactive,
    Suspended,
    Archived,
}

impl GroupStatus {
    /// Whether mutations into this group are currently accepted.
    pub fn accepts_writes(&self) -> bool {
        matches!(self, GroupStatus::Active)
    }
}

/// Per-group quota overrides. `None` inherits from the ancestor chain,
/// falling back to the platform defaults in [`crate::config::StrataConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuotaSettings {
    pub max_entities: Option<u64>,
    pub max_relationships: Option<u64>,
    pub max_knowledge_records: Option<u64>,
}

/// Structured group configuration: feature flags, quotas, branding.
///
/// Effective settings are resolved by layering a group's own settings
/// over its ancestor chain — the closest ancestor wins on conflict.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupSettings {
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default)]
    pub quotas: QuotaSettings,
    #[serde(default)]
    pub branding: BTreeMap<String, String>,
}

impl GroupSettings {
    /// Layer `self` over `ancestor`: keys present here shadow the
    /// ancestor's, everything else is inherited.
    pub fn layered_over(&self, ancestor: &GroupSettings) -> GroupSettings {
        let mut features = ancestor.features.clone();
        features.extend(self.features.iter().map(|(k, v)| (k.clone(), *v)));

        let mut branding = ancestor.branding.clone();
        branding.extend(self.branding.iter().map(|(k, v)| (k.clone(), v.clone())));

        GroupSettings {
            features,
            quotas: QuotaSettings {
                max_entities: self.quotas.max_entities.or(ancestor.quotas.max_entities),
                max_relationships: self
                    .quotas
                    .max_relationships
                    .or(ancestor.quotas.max_relationships),
                max_knowledge_records: self
                    .quotas
                    .max_knowledge_records
                    .or(ancestor.quotas.max_knowledge_records),
            },
            branding,
        }
    }
}

/// A tenant-scoping container. Groups nest to arbitrary depth via
/// `parent_id`; settings inherit down the ancestor chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    /// Unique, human-readable handle (unique across the whole store).
    pub slug: String,
    pub name: String,
    /// Open-ended classification tag ("organization", "team", ...).
    pub group_type: String,
    pub parent_id: Option<GroupId>,
    pub settings: GroupSettings,
    pub status: GroupStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Entities ──────────────────────────────────────────────────────

/// Lifecycle status of an entity. Entities are archived, never deleted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    Draft,
    Active,
    Published,
    Archived,
}

/// Any domain object ("thing") projected onto the store.
///
/// The `entity_type` tag is an open string; the shape of `attributes` is
/// owned by the per-type validator in the schema registry, never by the
/// store itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Tenant scope. `None` only for platform-global entities; set once
    /// at creation and never reassigned.
    pub group_id: Option<GroupId>,
    pub entity_type: String,
    pub name: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Relationships ─────────────────────────────────────────────────

/// A directed, typed edge between two entities.
///
/// Relationships are append-mostly: deactivation sets `valid_to`, it
/// never deletes the record. Ordering-sensitive relationship families
/// carry a `sequence` index kept gapless within a parent scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationId,
    pub from_id: EntityId,
    pub to_id: EntityId,
    pub relation_type: String,
    /// Edge-specific payload (role, strength, ...).
    pub metadata: serde_json::Value,
    /// Position within the (from_id, relation_type) scope; only present
    /// for ordered relationship families.
    pub sequence: Option<u32>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    /// Whether this relationship is active at `now`: started, and not
    /// yet expired.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && self.valid_to.map_or(true, |end| end > now)
    }
}

// ── Knowledge ─────────────────────────────────────────────────────

/// Kind discriminator for knowledge records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeKind {
    Label,
    Chunk,
}

/// A label set or text/vector chunk attached to a source entity.
///
/// Embeddings are produced by an external provider and handed to the
/// store pre-computed; all embeddings under one `embedding_model` share
/// one dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub id: KnowledgeId,
    /// Tenant scope, inherited from the source entity's group.
    pub group_id: GroupId,
    pub kind: KnowledgeKind,
    pub text: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_dimension: Option<usize>,
    pub source_entity_id: EntityId,
    pub source_field: Option<String>,
    pub chunk_index: Option<u32>,
    pub labels: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
