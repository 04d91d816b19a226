//! Tenant registry: group hierarchy, settings inheritance, lifecycle.

use chrono::Utc;

use strata_auth::Role;
use strata_core::events::kind;
use strata_core::{
    ActorContext, ActorId, Event, Group, GroupId, GroupSettings, GroupStatus, Result, StrataError,
};
use uuid::Uuid;

use crate::store::{OntologyStore, StoreInner};
use crate::txn::{Change, Txn};

/// Attributes for a new group.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub slug: String,
    pub name: String,
    pub group_type: String,
    pub settings: GroupSettings,
}

impl OntologyStore {
    // ── Lifecycle ────────────────────────────────────────────────

    /// Create a group, optionally nested under `parent_id`.
    pub fn create_group(
        &self,
        ctx: &ActorContext,
        parent_id: Option<GroupId>,
        new: NewGroup,
    ) -> Result<Group> {
        const OP: &str = "group.create";
        let mut inner = self.write()?;

        if new.slug.is_empty() {
            return Err(StrataError::Validation {
                operation: OP,
                field: "slug".to_string(),
                message: "slug must not be empty".to_string(),
            });
        }
        if inner.slugs.contains_key(&new.slug) {
            return Err(StrataError::Validation {
                operation: OP,
                field: "slug".to_string(),
                message: format!("slug `{}` is already in use", new.slug),
            });
        }
        if let Some(parent) = parent_id {
            let parent_group = inner.groups.get(&parent).ok_or(StrataError::NotFound {
                operation: OP,
                kind: "group",
                id: parent.to_string(),
            })?;
            if !parent_group.status.accepts_writes() {
                return Err(StrataError::Validation {
                    operation: OP,
                    field: "parent_id".to_string(),
                    message: format!("parent group is {:?}", parent_group.status).to_lowercase(),
                });
            }
        }

        let now = Utc::now();
        let group = Group {
            id: GroupId::new(),
            slug: new.slug,
            name: new.name,
            group_type: new.group_type,
            parent_id,
            settings: new.settings,
            status: GroupStatus::Active,
            created_at: now,
            updated_at: now,
        };

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutGroup(group.clone()));
        txn.emit(Event::new(
            kind::GROUP_CREATED,
            ctx.actor,
            Some(group.id.0),
            Some(group.id),
            serde_json::json!({
                "slug": group.slug,
                "group_type": group.group_type,
                "parent_id": parent_id.map(|p| p.to_string()),
            }),
        ));
        txn.commit(&mut inner)?;

        tracing::info!(group = %group.id, slug = %group.slug, "Group created");
        Ok(group)
    }

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        let inner = self.read()?;
        inner.groups.get(&id).cloned().ok_or(StrataError::NotFound {
            operation: "group.get",
            kind: "group",
            id: id.to_string(),
        })
    }

    pub fn get_group_by_slug(&self, slug: &str) -> Result<Group> {
        let inner = self.read()?;
        inner
            .slugs
            .get(slug)
            .and_then(|id| inner.groups.get(id))
            .cloned()
            .ok_or(StrataError::NotFound {
                operation: "group.get",
                kind: "group",
                id: slug.to_string(),
            })
    }

    /// Merge the group's settings over its ancestor chain; the closest
    /// ancestor wins on conflict.
    pub fn effective_settings(&self, id: GroupId) -> Result<GroupSettings> {
        let inner = self.read()?;
        effective_settings_of(&inner, id)
    }

    /// Change a group's lifecycle status. Takes effect immediately for
    /// every dependent lookup — there is no propagation lag.
    pub fn set_group_status(
        &self,
        ctx: &ActorContext,
        id: GroupId,
        status: GroupStatus,
    ) -> Result<Group> {
        const OP: &str = "group.setStatus";
        let mut inner = self.write()?;

        let mut group = inner.groups.get(&id).cloned().ok_or(StrataError::NotFound {
            operation: OP,
            kind: "group",
            id: id.to_string(),
        })?;
        let previous = group.status;
        group.status = status;
        group.updated_at = Utc::now();

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutGroup(group.clone()));
        txn.emit(Event::new(
            kind::GROUP_STATUS_CHANGED,
            ctx.actor,
            Some(id.0),
            Some(id),
            serde_json::json!({ "from": previous, "to": status }),
        ));
        txn.commit(&mut inner)?;

        tracing::info!(group = %id, ?status, "Group status changed");
        Ok(group)
    }

    /// Re-parent a group. The new parent must not be the group itself or
    /// any of its descendants — validated by walking the ancestor chain
    /// before commit.
    pub fn set_group_parent(
        &self,
        ctx: &ActorContext,
        id: GroupId,
        new_parent: Option<GroupId>,
    ) -> Result<Group> {
        const OP: &str = "group.setParent";
        let mut inner = self.write()?;

        let mut group = inner.groups.get(&id).cloned().ok_or(StrataError::NotFound {
            operation: OP,
            kind: "group",
            id: id.to_string(),
        })?;
        if let Some(parent) = new_parent {
            if !inner.groups.contains_key(&parent) {
                return Err(StrataError::NotFound {
                    operation: OP,
                    kind: "group",
                    id: parent.to_string(),
                });
            }
            if inner.ancestor_chain(parent).contains(&id) {
                return Err(StrataError::CycleDetected {
                    operation: OP,
                    group_id: id.to_string(),
                });
            }
        }

        let previous = group.parent_id;
        group.parent_id = new_parent;
        group.updated_at = Utc::now();

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutGroup(group.clone()));
        txn.emit(Event::new(
            kind::GROUP_PARENT_CHANGED,
            ctx.actor,
            Some(id.0),
            Some(id),
            serde_json::json!({
                "from": previous.map(|p| p.to_string()),
                "to": new_parent.map(|p| p.to_string()),
            }),
        ));
        txn.commit(&mut inner)?;

        Ok(group)
    }

    // ── Access grants ────────────────────────────────────────────

    /// Grant an actor a membership role (`org_owner` / `org_user`)
    /// within a group.
    pub fn grant_group_role(
        &self,
        ctx: &ActorContext,
        group_id: GroupId,
        subject: ActorId,
        role: Role,
    ) -> Result<Event> {
        const OP: &str = "group.grantRole";
        let mut inner = self.write()?;

        if !role.is_group_role() {
            return Err(StrataError::Validation {
                operation: OP,
                field: "role".to_string(),
                message: format!("{role:?} cannot be granted as a group membership"),
            });
        }
        if !inner.groups.contains_key(&group_id) {
            return Err(StrataError::NotFound {
                operation: OP,
                kind: "group",
                id: group_id.to_string(),
            });
        }

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutMembership {
            actor: subject,
            group: group_id,
            role,
        });
        txn.emit(Event::new(
            kind::GROUP_ROLE_GRANTED,
            ctx.actor,
            Some(subject.0),
            Some(group_id),
            serde_json::json!({ "subject": subject.to_string(), "role": role }),
        ));
        txn.commit(&mut inner)
    }

    /// Record an explicit assignment between an actor and a resource,
    /// the channel through which external actors reach anything at all.
    pub fn assign_resource(
        &self,
        ctx: &ActorContext,
        subject: ActorId,
        resource: Uuid,
    ) -> Result<Event> {
        const OP: &str = "access.assign";
        let mut inner = self.write()?;

        let group = resolve_resource_group(&inner, OP, resource)?;

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutAssignment {
            actor: subject,
            resource,
        });
        txn.emit(Event::new(
            kind::ACCESS_ASSIGNED,
            ctx.actor,
            Some(resource),
            group,
            serde_json::json!({ "subject": subject.to_string() }),
        ));
        txn.commit(&mut inner)
    }
}

/// Settings resolution shared by the public method and internal checks.
pub(crate) fn effective_settings_of(inner: &StoreInner, id: GroupId) -> Result<GroupSettings> {
    if !inner.groups.contains_key(&id) {
        return Err(StrataError::NotFound {
            operation: "group.effectiveSettings",
            kind: "group",
            id: id.to_string(),
        });
    }

    let chain = inner.ancestor_chain(id);
    let mut effective = GroupSettings::default();
    // Walk root-first so closer ancestors shadow farther ones.
    for gid in chain.iter().rev() {
        if let Some(group) = inner.groups.get(gid) {
            effective = group.settings.layered_over(&effective);
        }
    }
    Ok(effective)
}

/// The owning group of any addressable resource, or an error if the id
/// resolves to nothing.
pub(crate) fn resolve_resource_group(
    inner: &StoreInner,
    operation: &'static str,
    resource: Uuid,
) -> Result<Option<GroupId>> {
    let as_group = GroupId(resource);
    if inner.groups.contains_key(&as_group) {
        return Ok(Some(as_group));
    }
    if let Some(entity) = inner.entities.get(&strata_core::EntityId(resource)) {
        return Ok(entity.group_id);
    }
    if let Some(relation) = inner.relations.get(&strata_core::RelationId(resource)) {
        return Ok(inner.relation_group(relation));
    }
    Err(StrataError::NotFound {
        operation,
        kind: "resource",
        id: resource.to_string(),
    })
}
