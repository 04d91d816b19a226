//! strata-auth: Role and permission resolution for the Strata ontology store.
//!
//! The evaluator resolves an actor's effective power over a resource in
//! three steps: platform role short-circuits to allow, then membership
//! role within the resource's owning group, then an explicit per-resource
//! assignment. Any ambiguous or missing chain denies — fail-closed.
//!
//! The evaluator never touches storage directly; it sees the world
//! through the [`Directory`] trait, which the store implements.

pub mod directory;
pub mod evaluator;

use serde::{Deserialize, Serialize};

pub use directory::{Directory, ResourceRef};
pub use evaluator::{authorize, can_perform};

/// Actor roles, strongest first: `platform_owner > org_owner > org_user
/// > external_actor`. The first two carry scope (the platform, a group);
/// external actors only ever act through explicit assignments.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    ExternalActor,
    OrgUser,
    OrgOwner,
    PlatformOwner,
}

impl Role {
    /// Whether this role may be granted as a group membership.
    pub fn is_group_role(&self) -> bool {
        matches!(self, Role::OrgOwner | Role::OrgUser)
    }
}

/// What a caller is trying to do. Operations map onto one of these three
/// levels before evaluation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Read records within a tenant.
    Read,
    /// Create or modify entities, relationships, knowledge.
    Write,
    /// Manage the group itself: settings, status, role grants.
    Administer,
}
