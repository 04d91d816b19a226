//! Authorization evaluation.
//!
//! Invoked synchronously before every mutation and before any query that
//! crosses tenant boundaries.

use strata_core::{ActorContext, Result, StrataError};

use crate::{Action, Directory, ResourceRef, Role};

/// Resolve whether `actor` may perform `action` on `resource`.
///
/// Resolution order: platform role short-circuits to allow; otherwise
/// the actor's membership role within the resource's owning group;
/// otherwise an explicit assignment between actor and resource. A
/// missing resource means the action targets the platform itself and
/// requires the platform role. Everything else denies.
pub fn can_perform<D: Directory>(
    directory: &D,
    ctx: &ActorContext,
    action: Action,
    resource: Option<&ResourceRef>,
) -> bool {
    if directory.platform_role(&ctx.actor) == Some(Role::PlatformOwner) {
        return true;
    }

    let Some(resource) = resource else {
        // Platform-scoped action without the platform role.
        return false;
    };

    let group = resource.group.or_else(|| directory.owning_group(resource.id));
    if let Some(group) = group {
        match directory.group_role(&ctx.actor, &group) {
            Some(Role::OrgOwner) => return true,
            Some(Role::OrgUser) => {
                if matches!(action, Action::Read | Action::Write) {
                    return true;
                }
                // Org users never administer the group; fall through to
                // a possible explicit assignment (which cannot grant
                // Administer either, so this denies below).
            }
            _ => {}
        }
    }

    if matches!(action, Action::Read | Action::Write)
        && directory.assignment_exists(&ctx.actor, resource.id)
    {
        return true;
    }

    false
}

/// Like [`can_perform`], but returns the typed denial used by every
/// mutation path.
pub fn authorize<D: Directory>(
    directory: &D,
    ctx: &ActorContext,
    operation: &str,
    action: Action,
    resource: Option<&ResourceRef>,
) -> Result<()> {
    if can_perform(directory, ctx, action, resource) {
        return Ok(());
    }

    tracing::debug!(
        actor = %ctx.actor,
        operation,
        "Authorization denied"
    );

    Err(StrataError::Unauthorized {
        operation: operation.to_string(),
        actor: ctx.actor.to_string(),
        resource: resource
            .map(|r| r.id.to_string())
            .unwrap_or_else(|| "platform".to_string()),
    })
}
