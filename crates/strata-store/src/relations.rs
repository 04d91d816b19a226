//! Relationship graph: directed typed edges with temporal validity and
//! ordered families.
//!
//! Edges are append-mostly. Disconnecting sets `valid_to` and, for
//! ordered families, compacts the surviving sequence so active members
//! always form a gapless `0..n-1` run per (parent, type) scope.

use chrono::Utc;

use strata_core::events::kind;
use strata_core::{ActorContext, EntityId, Event, RelationId, Relationship, Result, StrataError};

use crate::store::{OntologyStore, StoreInner};
use crate::txn::{Change, Txn};

impl OntologyStore {
    // ── Writes ───────────────────────────────────────────────────

    /// Connect two entities with a typed edge. Ordered relationship
    /// families get the next free sequence index in the (from, type)
    /// scope.
    pub fn connect(
        &self,
        ctx: &ActorContext,
        from_id: EntityId,
        to_id: EntityId,
        relation_type: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Result<Relationship> {
        const OP: &str = "relationship.connect";
        let relation_type = relation_type.into();
        let mut inner = self.write()?;

        let from = inner.entities.get(&from_id).cloned().ok_or(StrataError::NotFound {
            operation: OP,
            kind: "entity",
            id: from_id.to_string(),
        })?;
        let to = inner.entities.get(&to_id).cloned().ok_or(StrataError::NotFound {
            operation: OP,
            kind: "entity",
            id: to_id.to_string(),
        })?;

        let spec = self.schemas().relation_spec(&relation_type);
        if !spec.cross_tenant {
            // Same tenant, unless one side is platform-global.
            if let (Some(fg), Some(tg)) = (from.group_id, to.group_id) {
                if fg != tg {
                    return Err(StrataError::Validation {
                        operation: OP,
                        field: "to_id".to_string(),
                        message: format!(
                            "endpoints belong to different groups ({fg} and {tg}) and `{relation_type}` is not cross-tenant"
                        ),
                    });
                }
            }
        }

        let group = from.group_id.or(to.group_id);
        if let Some(gid) = group {
            let limit = inner.effective_quota(
                self.config(),
                gid,
                |q| q.max_relationships,
                |d| d.max_relationships,
            );
            let current = inner.relation_counts.get(&gid).copied().unwrap_or(0);
            if current >= limit {
                return Err(StrataError::RateLimit {
                    operation: OP,
                    group_id: gid.to_string(),
                    quota: "max_relationships",
                    limit,
                });
            }
        }

        let now = Utc::now();
        let sequence = if spec.ordered {
            Some(active_scope(&inner, from_id, &relation_type, now).len() as u32)
        } else {
            None
        };

        let relation = Relationship {
            id: RelationId::new(),
            from_id,
            to_id,
            relation_type: relation_type.clone(),
            metadata,
            sequence,
            valid_from: now,
            valid_to: None,
            created_at: now,
        };

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutRelation(relation.clone()));
        if spec.ordered {
            let version = inner
                .ordering_versions
                .get(&(from_id, relation_type.clone()))
                .copied()
                .unwrap_or(0);
            txn.stage(Change::SetOrderingVersion {
                parent: from_id,
                relation_type: relation_type.clone(),
                version: version + 1,
            });
        }
        txn.emit(Event::new(
            kind::RELATIONSHIP_CONNECTED,
            ctx.actor,
            Some(relation.id.0),
            group,
            serde_json::json!({
                "from_id": from_id.to_string(),
                "to_id": to_id.to_string(),
                "relation_type": relation_type,
                "sequence": sequence,
            }),
        ));
        txn.commit(&mut inner)?;

        tracing::debug!(relation = %relation.id, relation_type = %relation.relation_type, "Relationship connected");
        Ok(relation)
    }

    /// Deactivate a relationship by setting `valid_to` to now. The
    /// record itself is never deleted. Surviving members of an ordered
    /// scope are compacted back to a gapless sequence in the same
    /// atomic unit.
    pub fn disconnect(&self, ctx: &ActorContext, id: RelationId) -> Result<Relationship> {
        const OP: &str = "relationship.disconnect";
        let mut inner = self.write()?;

        let mut relation = inner.relations.get(&id).cloned().ok_or(StrataError::NotFound {
            operation: OP,
            kind: "relationship",
            id: id.to_string(),
        })?;
        let now = Utc::now();
        if !relation.is_active_at(now) {
            return Err(StrataError::Validation {
                operation: OP,
                field: "id".to_string(),
                message: "relationship is already disconnected".to_string(),
            });
        }
        relation.valid_to = Some(now);

        let mut txn = Txn::new(OP);
        txn.stage(Change::PutRelation(relation.clone()));

        let mut resequenced = 0;
        if relation.sequence.is_some() {
            let mut survivors = active_scope(&inner, relation.from_id, &relation.relation_type, now);
            survivors.retain(|r| r.id != id);
            for (position, survivor) in survivors.into_iter().enumerate() {
                if survivor.sequence != Some(position as u32) {
                    let mut shifted = survivor;
                    shifted.sequence = Some(position as u32);
                    txn.stage(Change::PutRelation(shifted));
                    resequenced += 1;
                }
            }
            let version = inner
                .ordering_versions
                .get(&(relation.from_id, relation.relation_type.clone()))
                .copied()
                .unwrap_or(0);
            txn.stage(Change::SetOrderingVersion {
                parent: relation.from_id,
                relation_type: relation.relation_type.clone(),
                version: version + 1,
            });
        }

        txn.emit(Event::new(
            kind::RELATIONSHIP_DISCONNECTED,
            ctx.actor,
            Some(id.0),
            inner.relation_group(&relation),
            serde_json::json!({
                "relation_type": relation.relation_type,
                "resequenced": resequenced,
            }),
        ));
        txn.commit(&mut inner)?;

        Ok(relation)
    }

    /// Apply a caller-proposed ordering to an ordered scope.
    ///
    /// `new_order` must be a permutation of the scope's active members
    /// — same length, no duplicates, no foreign ids — and the caller
    /// must present the ordering version it last observed.
    pub fn reorder(
        &self,
        ctx: &ActorContext,
        parent_id: EntityId,
        relation_type: &str,
        new_order: &[RelationId],
        expected_version: u64,
    ) -> Result<Vec<Relationship>> {
        const OP: &str = "relationship.reorder";
        let mut inner = self.write()?;

        if !inner.entities.contains_key(&parent_id) {
            return Err(StrataError::NotFound {
                operation: OP,
                kind: "entity",
                id: parent_id.to_string(),
            });
        }
        if !self.schemas().relation_spec(relation_type).ordered {
            return Err(StrataError::Validation {
                operation: OP,
                field: "relation_type".to_string(),
                message: format!("`{relation_type}` is not an ordered relationship family"),
            });
        }

        let scope_key = (parent_id, relation_type.to_string());
        let current_version = inner.ordering_versions.get(&scope_key).copied().unwrap_or(0);
        if current_version != expected_version {
            return Err(StrataError::Conflict {
                operation: OP,
                scope: format!("{parent_id}/{relation_type}"),
                expected: expected_version,
                current: current_version,
            });
        }

        let now = Utc::now();
        let active = active_scope(&inner, parent_id, relation_type, now);
        validate_permutation(OP, parent_id, relation_type, &active, new_order)?;

        let mut txn = Txn::new(OP);
        let mut reordered = Vec::with_capacity(new_order.len());
        for (position, rid) in new_order.iter().enumerate() {
            // Permutation check guarantees membership.
            let mut relation = active
                .iter()
                .find(|r| r.id == *rid)
                .cloned()
                .ok_or_else(|| StrataError::Internal("validated id vanished".to_string()))?;
            relation.sequence = Some(position as u32);
            txn.stage(Change::PutRelation(relation.clone()));
            reordered.push(relation);
        }
        txn.stage(Change::SetOrderingVersion {
            parent: parent_id,
            relation_type: relation_type.to_string(),
            version: current_version + 1,
        });
        txn.emit(Event::new(
            kind::RELATIONSHIP_REORDERED,
            ctx.actor,
            Some(parent_id.0),
            inner.entities.get(&parent_id).and_then(|e| e.group_id),
            serde_json::json!({
                "relation_type": relation_type,
                "members": new_order.len(),
                "version": current_version + 1,
            }),
        ));
        txn.commit(&mut inner)?;

        Ok(reordered)
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Outgoing relationships of an entity. Active-only by default;
    /// `include_historical` adds expired records.
    pub fn list_from(
        &self,
        from_id: EntityId,
        relation_type: Option<&str>,
        include_historical: bool,
    ) -> Result<Vec<Relationship>> {
        const OP: &str = "relationship.listFrom";
        let inner = self.read()?;
        warn_if_archived(&inner, from_id);
        list_edges(&inner, OP, from_id, relation_type, include_historical, true)
    }

    /// Incoming relationships of an entity.
    pub fn list_to(
        &self,
        to_id: EntityId,
        relation_type: Option<&str>,
        include_historical: bool,
    ) -> Result<Vec<Relationship>> {
        const OP: &str = "relationship.listTo";
        let inner = self.read()?;
        warn_if_archived(&inner, to_id);
        list_edges(&inner, OP, to_id, relation_type, include_historical, false)
    }

    pub fn get_relationship(&self, id: RelationId) -> Result<Relationship> {
        let inner = self.read()?;
        inner.relations.get(&id).cloned().ok_or(StrataError::NotFound {
            operation: "relationship.get",
            kind: "relationship",
            id: id.to_string(),
        })
    }

    /// The optimistic-concurrency version callers must echo into
    /// [`reorder`](Self::reorder).
    pub fn ordering_version(&self, parent_id: EntityId, relation_type: &str) -> Result<u64> {
        let inner = self.read()?;
        Ok(inner
            .ordering_versions
            .get(&(parent_id, relation_type.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

/// Active members of an ordered scope, sequence order.
fn active_scope(
    inner: &StoreInner,
    parent_id: EntityId,
    relation_type: &str,
    now: chrono::DateTime<Utc>,
) -> Vec<Relationship> {
    let mut members: Vec<Relationship> = inner
        .outgoing
        .get(&parent_id)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| inner.relations.get(id))
                .filter(|r| r.relation_type == relation_type && r.is_active_at(now))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    members.sort_by_key(|r| (r.sequence.unwrap_or(u32::MAX), r.created_at));
    members
}

fn validate_permutation(
    operation: &'static str,
    parent_id: EntityId,
    relation_type: &str,
    active: &[Relationship],
    new_order: &[RelationId],
) -> Result<()> {
    let scope = format!("{parent_id}/{relation_type}");
    let invalid = |message: String| StrataError::InvalidSequence {
        operation,
        scope: scope.clone(),
        message,
    };

    if new_order.len() != active.len() {
        return Err(invalid(format!(
            "proposed ordering has {} members, scope has {}",
            new_order.len(),
            active.len()
        )));
    }

    let mut seen = std::collections::BTreeSet::new();
    for rid in new_order {
        if !seen.insert(*rid) {
            return Err(invalid(format!("duplicate id {rid}")));
        }
        if !active.iter().any(|r| r.id == *rid) {
            return Err(invalid(format!("id {rid} is not an active member of the scope")));
        }
    }
    Ok(())
}

fn list_edges(
    inner: &StoreInner,
    operation: &'static str,
    entity_id: EntityId,
    relation_type: Option<&str>,
    include_historical: bool,
    outgoing: bool,
) -> Result<Vec<Relationship>> {
    if !inner.entities.contains_key(&entity_id) {
        return Err(StrataError::NotFound {
            operation,
            kind: "entity",
            id: entity_id.to_string(),
        });
    }

    let index = if outgoing { &inner.outgoing } else { &inner.incoming };
    let now = Utc::now();
    let mut edges: Vec<Relationship> = index
        .get(&entity_id)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| inner.relations.get(id))
                .filter(|r| relation_type.map_or(true, |t| r.relation_type == t))
                .filter(|r| include_historical || r.is_active_at(now))
                .cloned()
                .collect()
        })
        .unwrap_or_default();
    edges.sort_by_key(|r| (r.sequence.unwrap_or(u32::MAX), r.created_at));
    Ok(edges)
}

/// Archived-parent policy: children of an archived entity stay valid,
/// but traversals log it.
fn warn_if_archived(inner: &StoreInner, entity_id: EntityId) {
    if let Some(entity) = inner.entities.get(&entity_id) {
        if entity.status == strata_core::EntityStatus::Archived {
            tracing::warn!(entity = %entity_id, "Traversing relationships of an archived entity");
        }
    }
}
