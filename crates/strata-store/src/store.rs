//! The store struct, its in-memory state, and index maintenance.
//!
//! All state sits behind one `RwLock`: reads share, mutations take the
//! writer side for the whole unit of work. Records are kept forever
//! (archive-only lifecycle), so the secondary indexes only ever move
//! ids between buckets, never drop them.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use uuid::Uuid;

use strata_auth::{Directory, Role};
use strata_core::config::StrataConfig;
use strata_core::{
    ActorId, Entity, EntityId, EntityStatus, Event, EventId, Group, GroupId, RelationId,
    Relationship, Result, StrataError,
};
use strata_knowledge::KnowledgeIndex;

use crate::schema::SchemaRegistry;

/// Query scope resolved by the router: a single tenant, or the whole
/// platform for explicitly-authorized global reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Group(GroupId),
    Platform,
}

impl Scope {
    pub(crate) fn admits(&self, group: Option<GroupId>) -> bool {
        match self {
            Scope::Platform => true,
            Scope::Group(gid) => group == Some(*gid),
        }
    }
}

/// The Strata ontology store.
pub struct OntologyStore {
    config: StrataConfig,
    schemas: SchemaRegistry,
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
pub(crate) struct StoreInner {
    // ── Groups ───────────────────────────────────────────────────
    pub groups: BTreeMap<GroupId, Group>,
    pub slugs: BTreeMap<String, GroupId>,

    // ── Entities ─────────────────────────────────────────────────
    pub entities: BTreeMap<EntityId, Entity>,
    /// Primary compound index.
    pub by_group_type: BTreeMap<(Option<GroupId>, String), BTreeSet<EntityId>>,
    /// Secondary index.
    pub by_type_status: BTreeMap<(String, EntityStatus), BTreeSet<EntityId>>,
    /// Full-text index over entity names.
    pub name_tokens: BTreeMap<String, BTreeSet<EntityId>>,
    pub entity_counts: BTreeMap<GroupId, u64>,

    // ── Relationships ────────────────────────────────────────────
    pub relations: BTreeMap<RelationId, Relationship>,
    pub outgoing: BTreeMap<EntityId, Vec<RelationId>>,
    pub incoming: BTreeMap<EntityId, Vec<RelationId>>,
    pub ordering_versions: BTreeMap<(EntityId, String), u64>,
    pub relation_counts: BTreeMap<GroupId, u64>,

    // ── Event log ────────────────────────────────────────────────
    pub events: Vec<Event>,
    pub events_by_id: BTreeMap<EventId, usize>,
    pub events_by_actor: BTreeMap<ActorId, Vec<usize>>,
    pub events_by_target: BTreeMap<Uuid, Vec<usize>>,
    pub events_by_type: BTreeMap<String, Vec<usize>>,
    /// BLAKE3 digest of (source, idempotency key) -> the event it minted.
    pub idempotency_keys: BTreeMap<String, EventId>,

    // ── Directory ────────────────────────────────────────────────
    pub platform_roles: BTreeMap<ActorId, Role>,
    pub memberships: BTreeMap<(ActorId, GroupId), Role>,
    pub assignments: BTreeSet<(ActorId, Uuid)>,

    // ── Knowledge ────────────────────────────────────────────────
    pub knowledge: KnowledgeIndex,
}

impl OntologyStore {
    pub fn new(config: StrataConfig) -> Self {
        Self::with_schemas(config, SchemaRegistry::new())
    }

    pub fn with_schemas(config: StrataConfig, schemas: SchemaRegistry) -> Self {
        Self {
            config,
            schemas,
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    /// The runtime schema registry; new types register here at any time.
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Bootstrap: seed the platform owner before any event can carry an
    /// authorized actor. Pre-history, so no audit event is emitted.
    pub fn seed_platform_owner(&self, actor: ActorId) -> Result<()> {
        let mut inner = self.write()?;
        inner.platform_roles.insert(actor, Role::PlatformOwner);
        tracing::info!(actor = %actor, "Platform owner seeded");
        Ok(())
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, StoreInner>> {
        self.inner
            .read()
            .map_err(|_| StrataError::Internal("store lock poisoned".to_string()))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, StoreInner>> {
        self.inner
            .write()
            .map_err(|_| StrataError::Internal("store lock poisoned".to_string()))
    }
}

impl StoreInner {
    // ── Index maintenance ────────────────────────────────────────

    pub(crate) fn apply_put_group(&mut self, group: Group) {
        if let Some(previous) = self.groups.get(&group.id) {
            if previous.slug != group.slug {
                self.slugs.remove(&previous.slug);
            }
        }
        self.slugs.insert(group.slug.clone(), group.id);
        self.groups.insert(group.id, group);
    }

    pub(crate) fn apply_put_entity(&mut self, entity: Entity) {
        if let Some(previous) = self.entities.get(&entity.id) {
            // Re-bucket: group_id and entity_type are immutable, but
            // status and name are not.
            if let Some(ids) = self
                .by_type_status
                .get_mut(&(previous.entity_type.clone(), previous.status))
            {
                ids.remove(&previous.id);
            }
            for token in name_tokens(&previous.name) {
                if let Some(ids) = self.name_tokens.get_mut(&token) {
                    ids.remove(&previous.id);
                }
            }
        } else {
            self.by_group_type
                .entry((entity.group_id, entity.entity_type.clone()))
                .or_default()
                .insert(entity.id);
            if let Some(group) = entity.group_id {
                *self.entity_counts.entry(group).or_default() += 1;
            }
        }

        self.by_type_status
            .entry((entity.entity_type.clone(), entity.status))
            .or_default()
            .insert(entity.id);
        for token in name_tokens(&entity.name) {
            self.name_tokens.entry(token).or_default().insert(entity.id);
        }
        self.entities.insert(entity.id, entity);
    }

    pub(crate) fn apply_put_relation(&mut self, relation: Relationship) {
        if !self.relations.contains_key(&relation.id) {
            self.outgoing
                .entry(relation.from_id)
                .or_default()
                .push(relation.id);
            self.incoming
                .entry(relation.to_id)
                .or_default()
                .push(relation.id);
            if let Some(group) = self.relation_group(&relation) {
                *self.relation_counts.entry(group).or_default() += 1;
            }
        }
        self.relations.insert(relation.id, relation);
    }

    pub(crate) fn push_event(&mut self, event: Event) {
        let position = self.events.len();
        self.events_by_id.insert(event.id, position);
        self.events_by_actor
            .entry(event.actor_id)
            .or_default()
            .push(position);
        if let Some(target) = event.target_id {
            self.events_by_target.entry(target).or_default().push(position);
        }
        self.events_by_type
            .entry(event.event_type.clone())
            .or_default()
            .push(position);
        if let Some(key) = &event.idempotency_key {
            self.idempotency_keys.insert(key.clone(), event.id);
        }
        self.events.push(event);
    }

    // ── Resolution helpers ───────────────────────────────────────

    /// The tenant a relationship is accounted to: the from-side's group,
    /// falling back to the to-side for platform-global sources.
    pub(crate) fn relation_group(&self, relation: &Relationship) -> Option<GroupId> {
        self.entities
            .get(&relation.from_id)
            .and_then(|e| e.group_id)
            .or_else(|| self.entities.get(&relation.to_id).and_then(|e| e.group_id))
    }

    /// Walk the ancestor chain of `group`, starting at the group itself.
    /// The guard set stops runaway walks if a cycle ever slipped in.
    pub(crate) fn ancestor_chain(&self, group: GroupId) -> Vec<GroupId> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut cursor = Some(group);
        while let Some(gid) = cursor {
            if !seen.insert(gid) {
                tracing::warn!(group = %gid, "Cycle encountered while walking ancestors");
                break;
            }
            chain.push(gid);
            cursor = self.groups.get(&gid).and_then(|g| g.parent_id);
        }
        chain
    }

    /// Effective quota limit for a group, layering its effective
    /// settings over the platform defaults.
    pub(crate) fn effective_quota(
        &self,
        config: &StrataConfig,
        group: GroupId,
        pick: fn(&strata_core::QuotaSettings) -> Option<u64>,
        fallback: fn(&strata_core::config::QuotaDefaults) -> u64,
    ) -> u64 {
        let mut limit = None;
        for gid in self.ancestor_chain(group) {
            if let Some(settings) = self.groups.get(&gid).map(|g| &g.settings) {
                if limit.is_none() {
                    limit = pick(&settings.quotas);
                }
            }
        }
        limit.unwrap_or_else(|| fallback(&config.quotas))
    }
}

/// Lowercase alphanumeric tokens of an entity name.
pub(crate) fn name_tokens(name: &str) -> Vec<String> {
    name.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

// ── Directory view for the authorization evaluator ────────────────

impl Directory for OntologyStore {
    fn platform_role(&self, actor: &ActorId) -> Option<Role> {
        let inner = self.read().ok()?;
        inner.platform_roles.get(actor).copied()
    }

    fn group_role(&self, actor: &ActorId, group: &GroupId) -> Option<Role> {
        let inner = self.read().ok()?;
        inner
            .ancestor_chain(*group)
            .into_iter()
            .filter_map(|gid| inner.memberships.get(&(*actor, gid)).copied())
            .max()
    }

    fn assignment_exists(&self, actor: &ActorId, resource: Uuid) -> bool {
        self.read()
            .map(|inner| inner.assignments.contains(&(*actor, resource)))
            .unwrap_or(false)
    }

    fn owning_group(&self, resource: Uuid) -> Option<GroupId> {
        let inner = self.read().ok()?;
        crate::groups::resolve_resource_group(&inner, "authorize", resource)
            .ok()
            .flatten()
    }

    fn is_known_actor(&self, actor: &ActorId) -> bool {
        self.read()
            .map(|inner| {
                inner.platform_roles.contains_key(actor)
                    || inner.memberships.keys().any(|(a, _)| a == actor)
                    || inner.assignments.iter().any(|(a, _)| a == actor)
            })
            .unwrap_or(false)
    }
}
