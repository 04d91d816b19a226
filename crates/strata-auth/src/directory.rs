//! The read-only view the evaluator has of actors and resources.

use strata_core::{ActorId, GroupId};
use uuid::Uuid;

use crate::Role;

/// A resource under evaluation: the record's id plus its owning group,
/// if it has one. Platform-global resources carry `group: None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRef {
    pub id: Uuid,
    pub group: Option<GroupId>,
}

impl ResourceRef {
    pub fn new(id: Uuid, group: Option<GroupId>) -> Self {
        Self { id, group }
    }
}

/// Directory of actors, memberships, and assignments.
///
/// Implemented by the store; the evaluator stays decoupled from how any
/// of this is persisted.
pub trait Directory {
    /// The actor's platform-level role, if any.
    fn platform_role(&self, actor: &ActorId) -> Option<Role>;

    /// The actor's effective membership role within a group, walking the
    /// group's ancestor chain (a role on a parent governs its children).
    fn group_role(&self, actor: &ActorId, group: &GroupId) -> Option<Role>;

    /// Whether an explicit assignment exists between actor and resource.
    fn assignment_exists(&self, actor: &ActorId, resource: Uuid) -> bool;

    /// Resolve the owning group of a resource id (entity, relationship,
    /// or the group itself). `None` when the resource is unknown or
    /// platform-global.
    fn owning_group(&self, resource: Uuid) -> Option<GroupId>;

    /// Whether the actor is known to the directory at all (any platform
    /// role, membership, or assignment).
    fn is_known_actor(&self, actor: &ActorId) -> bool;
}
