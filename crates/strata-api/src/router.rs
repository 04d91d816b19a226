//! The query router: `query(operation, args) -> {items, cursor}`.
//!
//! Tenant-first is enforced here, not in callers: every non-platform
//! query must name a `group_id`, and the global scope is only handed to
//! actors holding platform authorization who ask for it explicitly with
//! `"scope": "platform"`. Record-anchored lookups additionally verify
//! the record sits inside the requested scope, answering `NotFound`
//! rather than leaking foreign records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use strata_auth::{authorize, Action, ResourceRef};
use strata_core::{
    ActorContext, ActorId, EntityId, EntityStatus, GroupId, KnowledgeKind, Result, StrataError,
};
use strata_knowledge::SearchFilters;
use strata_store::{EntityFilter, PageRequest, Scope, TimeRange};

use crate::mutate::parse;
use crate::service::OntologyService;

/// One page of query results.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub items: Vec<serde_json::Value>,
    pub cursor: Option<String>,
}

impl QueryResult {
    fn of<T: Serialize>(items: Vec<T>, cursor: Option<String>) -> Result<Self> {
        let items = items
            .into_iter()
            .map(|item| serde_json::to_value(item).map_err(StrataError::from))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { items, cursor })
    }
}

// ── Argument shapes ───────────────────────────────────────────────

#[derive(Deserialize)]
struct ScopeArgs {
    group_id: Option<GroupId>,
    scope: Option<String>,
}

#[derive(Deserialize)]
struct GroupGetArgs {
    group_id: GroupId,
}

#[derive(Deserialize)]
struct EntityGetArgs {
    entity_id: EntityId,
}

#[derive(Deserialize)]
struct EntityListArgs {
    entity_type: Option<String>,
    status: Option<EntityStatus>,
    cursor: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Deserialize)]
struct EntitySearchArgs {
    text: String,
}

#[derive(Deserialize)]
struct EdgeListArgs {
    entity_id: EntityId,
    relation_type: Option<String>,
    #[serde(default)]
    include_historical: bool,
}

#[derive(Deserialize)]
struct OrderingVersionArgs {
    entity_id: EntityId,
    relation_type: String,
}

#[derive(Deserialize)]
struct EventWindowArgs {
    actor_id: Option<ActorId>,
    target_id: Option<Uuid>,
    event_type: Option<String>,
    from: Option<chrono::DateTime<chrono::Utc>>,
    to: Option<chrono::DateTime<chrono::Utc>>,
}

impl EventWindowArgs {
    fn range(&self) -> TimeRange {
        TimeRange {
            from: self.from,
            to: self.to,
        }
    }
}

#[derive(Deserialize)]
struct KnowledgeSearchArgs {
    vector: Vec<f32>,
    model: String,
    #[serde(default = "default_k")]
    k: usize,
    source_entity_id: Option<EntityId>,
    kind: Option<KnowledgeKind>,
}

fn default_k() -> usize {
    10
}

#[derive(Deserialize)]
struct LabelSearchArgs {
    label: String,
}

impl OntologyService {
    /// Run one registered query.
    pub async fn query(
        &self,
        ctx: &ActorContext,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<QueryResult> {
        let store = self.store();
        match operation {
            "group.get" => {
                const OP: &str = "group.get";
                let scoped: GroupGetArgs = parse(OP, args)?;
                self.authorize_group_read(ctx, OP, scoped.group_id)?;
                QueryResult::of(vec![store.get_group(scoped.group_id)?], None)
            }
            "group.effectiveSettings" => {
                const OP: &str = "group.effectiveSettings";
                let scoped: GroupGetArgs = parse(OP, args)?;
                self.authorize_group_read(ctx, OP, scoped.group_id)?;
                QueryResult::of(vec![store.effective_settings(scoped.group_id)?], None)
            }
            "entity.get" => {
                const OP: &str = "entity.get";
                let scope = self.resolve_scope(ctx, OP, &args)?;
                let query: EntityGetArgs = parse(OP, args)?;
                let entity = store.get_entity(query.entity_id)?;
                if !scope_admits(scope, entity.group_id) {
                    return Err(not_found_in_scope(OP, query.entity_id.0));
                }
                QueryResult::of(vec![entity], None)
            }
            "entity.list" => {
                const OP: &str = "entity.list";
                let scope = self.resolve_scope(ctx, OP, &args)?;
                let query: EntityListArgs = parse(OP, args)?;
                let page = store.list_entities(
                    scope,
                    &EntityFilter {
                        entity_type: query.entity_type,
                        status: query.status,
                    },
                    &PageRequest {
                        cursor: query.cursor,
                        limit: query.limit,
                    },
                )?;
                QueryResult::of(page.items, page.cursor)
            }
            "entity.search" => {
                const OP: &str = "entity.search";
                let scope = self.resolve_scope(ctx, OP, &args)?;
                let query: EntitySearchArgs = parse(OP, args)?;
                QueryResult::of(store.search_entities(scope, &query.text)?, None)
            }
            "relationship.listFrom" => {
                const OP: &str = "relationship.listFrom";
                let scope = self.resolve_scope(ctx, OP, &args)?;
                let query: EdgeListArgs = parse(OP, args)?;
                self.check_entity_in_scope(OP, scope, query.entity_id)?;
                QueryResult::of(
                    store.list_from(
                        query.entity_id,
                        query.relation_type.as_deref(),
                        query.include_historical,
                    )?,
                    None,
                )
            }
            "relationship.listTo" => {
                const OP: &str = "relationship.listTo";
                let scope = self.resolve_scope(ctx, OP, &args)?;
                let query: EdgeListArgs = parse(OP, args)?;
                self.check_entity_in_scope(OP, scope, query.entity_id)?;
                QueryResult::of(
                    store.list_to(
                        query.entity_id,
                        query.relation_type.as_deref(),
                        query.include_historical,
                    )?,
                    None,
                )
            }
            "relationship.orderingVersion" => {
                const OP: &str = "relationship.orderingVersion";
                let scope = self.resolve_scope(ctx, OP, &args)?;
                let query: OrderingVersionArgs = parse(OP, args)?;
                self.check_entity_in_scope(OP, scope, query.entity_id)?;
                let version = store.ordering_version(query.entity_id, &query.relation_type)?;
                QueryResult::of(vec![serde_json::json!({ "version": version })], None)
            }
            "event.byActor" => {
                const OP: &str = "event.byActor";
                let scope = self.resolve_scope(ctx, OP, &args)?;
                let query: EventWindowArgs = parse(OP, args)?;
                let actor = query.actor_id.ok_or_else(|| missing(OP, "actor_id"))?;
                QueryResult::of(store.events_by_actor(scope, actor, &query.range())?, None)
            }
            "event.byTarget" => {
                const OP: &str = "event.byTarget";
                let scope = self.resolve_scope(ctx, OP, &args)?;
                let query: EventWindowArgs = parse(OP, args)?;
                let target = query.target_id.ok_or_else(|| missing(OP, "target_id"))?;
                QueryResult::of(store.events_by_target(scope, target, &query.range())?, None)
            }
            "event.byType" => {
                const OP: &str = "event.byType";
                let scope = self.resolve_scope(ctx, OP, &args)?;
                let query: EventWindowArgs = parse(OP, args)?;
                let range = query.range();
                let event_type = query.event_type.ok_or_else(|| missing(OP, "event_type"))?;
                QueryResult::of(store.events_by_type(scope, &event_type, &range)?, None)
            }
            "knowledge.search" => {
                const OP: &str = "knowledge.search";
                let group_id = self.require_group_scope(ctx, OP, &args)?;
                let query: KnowledgeSearchArgs = parse(OP, args)?;
                let hits = store.search_knowledge(
                    group_id,
                    &query.vector,
                    &query.model,
                    query.k,
                    &SearchFilters {
                        source_entity_id: query.source_entity_id,
                        kind: query.kind,
                    },
                )?;
                QueryResult::of(hits, None)
            }
            "knowledge.byLabel" => {
                const OP: &str = "knowledge.byLabel";
                let group_id = self.require_group_scope(ctx, OP, &args)?;
                let query: LabelSearchArgs = parse(OP, args)?;
                QueryResult::of(store.search_by_label(group_id, &query.label)?, None)
            }
            _ => Err(StrataError::UnsupportedOperation {
                operation: operation.to_string(),
            }),
        }
    }

    // ── Scope enforcement ────────────────────────────────────────

    /// Resolve the query scope from `args`: a mandatory `group_id`, or
    /// the global scope for platform-authorized callers who request it
    /// explicitly.
    fn resolve_scope(
        &self,
        ctx: &ActorContext,
        operation: &'static str,
        args: &serde_json::Value,
    ) -> Result<Scope> {
        let scoped: ScopeArgs = parse(operation, args.clone())?;

        if scoped.scope.as_deref() == Some("platform") {
            authorize(self.store(), ctx, operation, Action::Read, None)?;
            return Ok(Scope::Platform);
        }

        let group_id = scoped
            .group_id
            .ok_or_else(|| StrataError::Validation {
                operation,
                field: "group_id".to_string(),
                message: "group_id is required unless scope is \"platform\"".to_string(),
            })?;
        self.authorize_group_read(ctx, operation, group_id)?;
        Ok(Scope::Group(group_id))
    }

    /// Like [`resolve_scope`](Self::resolve_scope), for operations that
    /// have no platform variant.
    fn require_group_scope(
        &self,
        ctx: &ActorContext,
        operation: &'static str,
        args: &serde_json::Value,
    ) -> Result<GroupId> {
        match self.resolve_scope(ctx, operation, args)? {
            Scope::Group(group_id) => Ok(group_id),
            Scope::Platform => Err(StrataError::Validation {
                operation,
                field: "group_id".to_string(),
                message: "this operation is always tenant-scoped".to_string(),
            }),
        }
    }

    fn authorize_group_read(
        &self,
        ctx: &ActorContext,
        operation: &'static str,
        group_id: GroupId,
    ) -> Result<()> {
        let resource = ResourceRef::new(group_id.0, Some(group_id));
        authorize(self.store(), ctx, operation, Action::Read, Some(&resource))
    }

    fn check_entity_in_scope(
        &self,
        operation: &'static str,
        scope: Scope,
        entity_id: EntityId,
    ) -> Result<()> {
        let entity = self.store().get_entity(entity_id)?;
        if scope_admits(scope, entity.group_id) {
            Ok(())
        } else {
            Err(not_found_in_scope(operation, entity_id.0))
        }
    }
}

fn scope_admits(scope: Scope, group: Option<GroupId>) -> bool {
    match scope {
        Scope::Platform => true,
        Scope::Group(gid) => group == Some(gid),
    }
}

/// A record outside the caller's scope looks exactly like a missing one.
fn not_found_in_scope(operation: &'static str, id: Uuid) -> StrataError {
    StrataError::NotFound {
        operation,
        kind: "entity",
        id: id.to_string(),
    }
}

fn missing(operation: &'static str, field: &str) -> StrataError {
    StrataError::Validation {
        operation,
        field: field.to_string(),
        message: "is required".to_string(),
    }
}
