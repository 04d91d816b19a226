//! The mutation contract: `mutate(operation, args) -> {id, event}`.
//!
//! Operations form a registered set; anything else returns
//! `UnsupportedOperation`. Authorization runs before the store is
//! touched, and every successful call hands back the single audit
//! event its mutation produced.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use strata_auth::{authorize, Action, ResourceRef, Role};
use strata_core::{
    ActorContext, ActorId, EntityId, EntityStatus, Event, GroupId, GroupSettings, GroupStatus,
    RelationId, Result, StrataError,
};
use strata_store::{EntityPatch, KnowledgeChunk, NewEntity, NewGroup};

use crate::service::OntologyService;

/// Outcome of a mutation: the mutated record's id and its audit event.
#[derive(Debug, Clone, Serialize)]
pub struct MutationReceipt {
    pub id: Uuid,
    pub event: Event,
}

// ── Argument shapes ───────────────────────────────────────────────

#[derive(Deserialize)]
struct GroupCreateArgs {
    slug: String,
    name: String,
    #[serde(default = "default_group_type")]
    group_type: String,
    parent_id: Option<GroupId>,
    #[serde(default)]
    settings: GroupSettings,
}

fn default_group_type() -> String {
    "organization".to_string()
}

#[derive(Deserialize)]
struct GroupStatusArgs {
    group_id: GroupId,
    status: GroupStatus,
}

#[derive(Deserialize)]
struct GroupParentArgs {
    group_id: GroupId,
    parent_id: Option<GroupId>,
}

#[derive(Deserialize)]
struct GrantRoleArgs {
    group_id: GroupId,
    subject: ActorId,
    role: Role,
}

#[derive(Deserialize)]
struct EntityCreateArgs {
    group_id: Option<GroupId>,
    entity_type: String,
    name: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct EntityUpdateArgs {
    entity_id: EntityId,
    name: Option<String>,
    attributes: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Deserialize)]
struct EntityStatusArgs {
    entity_id: EntityId,
    status: EntityStatus,
}

#[derive(Deserialize)]
struct ConnectArgs {
    from_id: EntityId,
    to_id: EntityId,
    relation_type: String,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Deserialize)]
struct DisconnectArgs {
    relationship_id: RelationId,
}

#[derive(Deserialize)]
struct ReorderArgs {
    parent_id: EntityId,
    relation_type: String,
    new_order: Vec<RelationId>,
    expected_version: u64,
}

#[derive(Deserialize)]
struct AttachLabelsArgs {
    entity_id: EntityId,
    labels: Vec<String>,
}

#[derive(Deserialize)]
struct UpsertEmbeddingArgs {
    entity_id: EntityId,
    text: String,
    vector: Vec<f32>,
    model: String,
    chunk_index: Option<u32>,
    source_field: Option<String>,
}

#[derive(Deserialize)]
struct AssignArgs {
    subject: ActorId,
    resource_id: Uuid,
}

impl OntologyService {
    /// Apply one registered mutation.
    pub async fn mutate(
        &self,
        ctx: &ActorContext,
        operation: &str,
        args: serde_json::Value,
    ) -> Result<MutationReceipt> {
        let store = self.store();
        match operation {
            "group.create" => {
                const OP: &str = "group.create";
                let args: GroupCreateArgs = parse(OP, args)?;
                let resource = args.parent_id.map(|p| ResourceRef::new(p.0, Some(p)));
                authorize(store, ctx, OP, Action::Administer, resource.as_ref())?;
                let group = store.create_group(
                    ctx,
                    args.parent_id,
                    NewGroup {
                        slug: args.slug,
                        name: args.name,
                        group_type: args.group_type,
                        settings: args.settings,
                    },
                )?;
                self.receipt(group.id.0)
            }
            "group.setStatus" => {
                const OP: &str = "group.setStatus";
                let args: GroupStatusArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.group_id.0, Some(args.group_id));
                authorize(store, ctx, OP, Action::Administer, Some(&resource))?;
                let group = store.set_group_status(ctx, args.group_id, args.status)?;
                self.receipt(group.id.0)
            }
            "group.setParent" => {
                const OP: &str = "group.setParent";
                let args: GroupParentArgs = parse(OP, args)?;
                // Re-parenting moves a subtree between tenants: platform only.
                authorize(store, ctx, OP, Action::Administer, None)?;
                let group = store.set_group_parent(ctx, args.group_id, args.parent_id)?;
                self.receipt(group.id.0)
            }
            "group.grantRole" => {
                const OP: &str = "group.grantRole";
                let args: GrantRoleArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.group_id.0, Some(args.group_id));
                authorize(store, ctx, OP, Action::Administer, Some(&resource))?;
                let event = store.grant_group_role(ctx, args.group_id, args.subject, args.role)?;
                Ok(MutationReceipt {
                    id: args.subject.0,
                    event,
                })
            }
            "entity.create" => {
                const OP: &str = "entity.create";
                let args: EntityCreateArgs = parse(OP, args)?;
                let resource = args.group_id.map(|g| ResourceRef::new(g.0, Some(g)));
                authorize(store, ctx, OP, Action::Write, resource.as_ref())?;
                let entity = store.create_entity(
                    ctx,
                    args.group_id,
                    NewEntity {
                        entity_type: args.entity_type,
                        name: args.name,
                        attributes: args.attributes,
                    },
                )?;
                self.receipt(entity.id.0)
            }
            "entity.update" => {
                const OP: &str = "entity.update";
                let args: EntityUpdateArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.entity_id.0, None);
                authorize(store, ctx, OP, Action::Write, Some(&resource))?;
                let entity = store.update_entity(
                    ctx,
                    args.entity_id,
                    EntityPatch {
                        name: args.name,
                        attributes: args.attributes,
                    },
                )?;
                self.receipt(entity.id.0)
            }
            "entity.setStatus" => {
                const OP: &str = "entity.setStatus";
                let args: EntityStatusArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.entity_id.0, None);
                authorize(store, ctx, OP, Action::Write, Some(&resource))?;
                let entity = store.set_entity_status(ctx, args.entity_id, args.status)?;
                self.receipt(entity.id.0)
            }
            "relationship.connect" => {
                const OP: &str = "relationship.connect";
                let args: ConnectArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.from_id.0, None);
                authorize(store, ctx, OP, Action::Write, Some(&resource))?;
                let relation = store.connect(
                    ctx,
                    args.from_id,
                    args.to_id,
                    args.relation_type,
                    args.metadata,
                )?;
                self.receipt(relation.id.0)
            }
            "relationship.disconnect" => {
                const OP: &str = "relationship.disconnect";
                let args: DisconnectArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.relationship_id.0, None);
                authorize(store, ctx, OP, Action::Write, Some(&resource))?;
                let relation = store.disconnect(ctx, args.relationship_id)?;
                self.receipt(relation.id.0)
            }
            "relationship.reorder" => {
                const OP: &str = "relationship.reorder";
                let args: ReorderArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.parent_id.0, None);
                authorize(store, ctx, OP, Action::Write, Some(&resource))?;
                store.reorder(
                    ctx,
                    args.parent_id,
                    &args.relation_type,
                    &args.new_order,
                    args.expected_version,
                )?;
                self.receipt(args.parent_id.0)
            }
            "knowledge.attachLabels" => {
                const OP: &str = "knowledge.attachLabels";
                let args: AttachLabelsArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.entity_id.0, None);
                authorize(store, ctx, OP, Action::Write, Some(&resource))?;
                store.attach_labels(ctx, args.entity_id, &args.labels)?;
                self.receipt(args.entity_id.0)
            }
            "knowledge.upsertEmbedding" => {
                const OP: &str = "knowledge.upsertEmbedding";
                let args: UpsertEmbeddingArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.entity_id.0, None);
                authorize(store, ctx, OP, Action::Write, Some(&resource))?;
                store.upsert_embedding(
                    ctx,
                    args.entity_id,
                    KnowledgeChunk {
                        text: args.text,
                        vector: args.vector,
                        model: args.model,
                        chunk_index: args.chunk_index,
                        source_field: args.source_field,
                    },
                )?;
                self.receipt(args.entity_id.0)
            }
            "access.assign" => {
                const OP: &str = "access.assign";
                let args: AssignArgs = parse(OP, args)?;
                let resource = ResourceRef::new(args.resource_id, None);
                authorize(store, ctx, OP, Action::Administer, Some(&resource))?;
                let event = store.assign_resource(ctx, args.subject, args.resource_id)?;
                Ok(MutationReceipt {
                    id: args.resource_id,
                    event,
                })
            }
            _ => Err(StrataError::UnsupportedOperation {
                operation: operation.to_string(),
            }),
        }
    }

    fn receipt(&self, id: Uuid) -> Result<MutationReceipt> {
        let event = self.latest_event_for(id)?;
        Ok(MutationReceipt { id, event })
    }
}

pub(crate) fn parse<T: DeserializeOwned>(
    operation: &'static str,
    args: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(args).map_err(|e| StrataError::Validation {
        operation,
        field: "args".to_string(),
        message: e.to_string(),
    })
}
