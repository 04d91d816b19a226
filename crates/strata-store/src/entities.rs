//! Entity store: typed, polymorphic records with compound indexing.

use chrono::Utc;

use strata_core::events::kind;
use strata_core::{
    ActorContext, Entity, EntityId, EntityStatus, Event, GroupId, Result, StrataError,
};

use crate::store::{name_tokens, OntologyStore, Scope, StoreInner};
use crate::txn::{Change, Txn};

/// Attributes for a new entity.
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub entity_type: String,
    pub name: String,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// A partial update. Attribute patches shallow-merge into the existing
/// bag; absent fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct EntityPatch {
    pub name: Option<String>,
    pub attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

/// List predicates. Without an explicit status, archived records stay
/// out of the result.
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub entity_type: Option<String>,
    pub status: Option<EntityStatus>,
}

/// Offset-cursor pagination.
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub cursor: Option<String>,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            cursor: None,
            limit: 50,
        }
    }
}

/// One page of results plus the cursor for the next, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub cursor: Option<String>,
}

impl OntologyStore {
    // ── Writes ───────────────────────────────────────────────────

    /// Create an entity scoped to `group_id`, or a platform-global one
    /// when `group_id` is `None`. The group is set once, here, and never
    /// reassigned.
    pub fn create_entity(
        &self,
        ctx: &ActorContext,
        group_id: Option<GroupId>,
        new: NewEntity,
    ) -> Result<Entity> {
        const OP: &str = "entity.create";
        let mut inner = self.write()?;

        if let Some(gid) = group_id {
            let group = inner.groups.get(&gid).ok_or(StrataError::NotFound {
                operation: OP,
                kind: "group",
                id: gid.to_string(),
            })?;
            if !group.status.accepts_writes() {
                return Err(StrataError::Validation {
                    operation: OP,
                    field: "group_id".to_string(),
                    message: format!("group {} is {:?}", group.slug, group.status).to_lowercase(),
                });
            }

            let limit = inner.effective_quota(
                self.config(),
                gid,
                |q| q.max_entities,
                |d| d.max_entities,
            );
            let current = inner.entity_counts.get(&gid).copied().unwrap_or(0);
            if current >= limit {
                return Err(StrataError::RateLimit {
                    operation: OP,
                    group_id: gid.to_string(),
                    quota: "max_entities",
                    limit,
                });
            }
        }

        self.schemas()
            .validate_attributes(OP, &new.entity_type, &new.attributes)?;

        let now = Utc::now();
        let entity = Entity {
            id: EntityId::new(),
            group_id,
            entity_type: new.entity_type,
            name: new.name,
            attributes: new.attributes,
            status: EntityStatus::Draft,
            created_at: now,
            updated_at: now,
        };

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutEntity(entity.clone()));
        txn.emit(Event::new(
            kind::ENTITY_CREATED,
            ctx.actor,
            Some(entity.id.0),
            group_id,
            serde_json::json!({ "entity_type": entity.entity_type, "name": entity.name }),
        ));
        txn.commit(&mut inner)?;

        tracing::debug!(entity = %entity.id, entity_type = %entity.entity_type, "Entity created");
        Ok(entity)
    }

    /// Shallow-merge a patch into the entity. Attribute shape is checked
    /// by the type's registered validator against the merged bag.
    pub fn update_entity(
        &self,
        ctx: &ActorContext,
        id: EntityId,
        patch: EntityPatch,
    ) -> Result<Entity> {
        const OP: &str = "entity.update";
        let mut inner = self.write()?;

        let mut entity = fetch(&inner, OP, id)?;
        ensure_group_writable(&inner, OP, &entity)?;

        let mut changed_fields = Vec::new();
        if let Some(name) = patch.name {
            if name != entity.name {
                changed_fields.push("name".to_string());
                entity.name = name;
            }
        }
        if let Some(attributes) = patch.attributes {
            for (key, value) in attributes {
                changed_fields.push(format!("attributes.{key}"));
                entity.attributes.insert(key, value);
            }
            self.schemas()
                .validate_attributes(OP, &entity.entity_type, &entity.attributes)?;
        }
        entity.updated_at = Utc::now();

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutEntity(entity.clone()));
        txn.emit(Event::new(
            kind::ENTITY_UPDATED,
            ctx.actor,
            Some(id.0),
            entity.group_id,
            serde_json::json!({ "changed_fields": changed_fields }),
        ));
        txn.commit(&mut inner)?;

        Ok(entity)
    }

    pub fn set_entity_status(
        &self,
        ctx: &ActorContext,
        id: EntityId,
        status: EntityStatus,
    ) -> Result<Entity> {
        const OP: &str = "entity.setStatus";
        let mut inner = self.write()?;

        let mut entity = fetch(&inner, OP, id)?;
        ensure_group_writable(&inner, OP, &entity)?;

        let previous = entity.status;
        entity.status = status;
        entity.updated_at = Utc::now();

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutEntity(entity.clone()));
        txn.emit(Event::new(
            kind::ENTITY_STATUS_CHANGED,
            ctx.actor,
            Some(id.0),
            entity.group_id,
            serde_json::json!({ "from": previous, "to": status }),
        ));
        txn.commit(&mut inner)?;

        Ok(entity)
    }

    // ── Reads ────────────────────────────────────────────────────

    pub fn get_entity(&self, id: EntityId) -> Result<Entity> {
        let inner = self.read()?;
        fetch(&inner, "entity.get", id)
    }

    /// List entities within a scope, newest-updated first.
    pub fn list_entities(
        &self,
        scope: Scope,
        filter: &EntityFilter,
        page: &PageRequest,
    ) -> Result<Page<Entity>> {
        const OP: &str = "entity.list";
        let inner = self.read()?;

        // The compound indexes carry the common predicates; everything
        // else falls back to a scoped scan.
        let mut matches: Vec<&Entity> = match (&scope, &filter.entity_type, filter.status) {
            (Scope::Group(gid), Some(entity_type), _) => inner
                .by_group_type
                .get(&(Some(*gid), entity_type.clone()))
                .map(|ids| ids.iter().filter_map(|id| inner.entities.get(id)).collect())
                .unwrap_or_default(),
            (Scope::Platform, Some(entity_type), Some(status)) => inner
                .by_type_status
                .get(&(entity_type.clone(), status))
                .map(|ids| ids.iter().filter_map(|id| inner.entities.get(id)).collect())
                .unwrap_or_default(),
            _ => inner
                .entities
                .values()
                .filter(|e| scope.admits(e.group_id))
                .filter(|e| {
                    filter
                        .entity_type
                        .as_deref()
                        .map_or(true, |t| e.entity_type == t)
                })
                .collect(),
        };

        matches.retain(|e| {
            scope.admits(e.group_id)
                && match filter.status {
                    Some(status) => e.status == status,
                    None => e.status != EntityStatus::Archived,
                }
        });
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        paginate(OP, matches, page)
    }

    /// Full-text lookup over entity names within a scope. Every token of
    /// the query must match.
    pub fn search_entities(&self, scope: Scope, text: &str) -> Result<Vec<Entity>> {
        let inner = self.read()?;

        let tokens = name_tokens(text);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates: Option<std::collections::BTreeSet<EntityId>> = None;
        for token in &tokens {
            let ids = inner.name_tokens.get(token).cloned().unwrap_or_default();
            candidates = Some(match candidates {
                Some(existing) => existing.intersection(&ids).copied().collect(),
                None => ids,
            });
        }

        let mut found: Vec<Entity> = candidates
            .unwrap_or_default()
            .into_iter()
            .filter_map(|id| inner.entities.get(&id))
            .filter(|e| scope.admits(e.group_id))
            .filter(|e| e.status != EntityStatus::Archived)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(found)
    }
}

fn fetch(inner: &StoreInner, operation: &'static str, id: EntityId) -> Result<Entity> {
    inner.entities.get(&id).cloned().ok_or(StrataError::NotFound {
        operation,
        kind: "entity",
        id: id.to_string(),
    })
}

/// Mutations require the entity's group (when it has one) to accept
/// writes; a suspended or archived tenant is read-only.
fn ensure_group_writable(inner: &StoreInner, operation: &'static str, entity: &Entity) -> Result<()> {
    if let Some(gid) = entity.group_id {
        if let Some(group) = inner.groups.get(&gid) {
            if !group.status.accepts_writes() {
                return Err(StrataError::Validation {
                    operation,
                    field: "group_id".to_string(),
                    message: format!("group {} is {:?}", group.slug, group.status).to_lowercase(),
                });
            }
        }
    }
    Ok(())
}

fn paginate(
    operation: &'static str,
    matches: Vec<&Entity>,
    page: &PageRequest,
) -> Result<Page<Entity>> {
    let offset = match &page.cursor {
        None => 0,
        Some(cursor) => cursor.parse::<usize>().map_err(|_| StrataError::Validation {
            operation,
            field: "cursor".to_string(),
            message: format!("malformed cursor `{cursor}`"),
        })?,
    };

    let items: Vec<Entity> = matches
        .iter()
        .skip(offset)
        .take(page.limit)
        .map(|e| (*e).clone())
        .collect();
    let next = offset + items.len();
    let cursor = (next < matches.len()).then(|| next.to_string());

    Ok(Page { items, cursor })
}
