//! Append-only audit log queries and external event ingestion.
//!
//! Appends only ever happen inside a mutation's unit of work; there is
//! no free-standing public write. The one externally reachable path is
//! webhook ingestion, which is idempotent on a caller-supplied key and
//! records a fact without granting entity-write access.

use chrono::{DateTime, Utc};

use strata_core::{ActorContext, ActorId, Event, EventId, GroupId, Result, StrataError};
use uuid::Uuid;

use crate::store::{OntologyStore, Scope, StoreInner};
use crate::txn::Txn;

/// Half-open time window; unset bounds are unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        if let Some(from) = self.from {
            if at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if at > to {
                return false;
            }
        }
        true
    }
}

impl OntologyStore {
    // ── Queries ──────────────────────────────────────────────────

    /// Events emitted by an actor, in commit order.
    pub fn events_by_actor(
        &self,
        scope: Scope,
        actor: ActorId,
        range: &TimeRange,
    ) -> Result<Vec<Event>> {
        let inner = self.read()?;
        Ok(collect(&inner, inner.events_by_actor.get(&actor), scope, range))
    }

    /// Events whose target is the given record, in commit order.
    pub fn events_by_target(
        &self,
        scope: Scope,
        target: Uuid,
        range: &TimeRange,
    ) -> Result<Vec<Event>> {
        let inner = self.read()?;
        Ok(collect(&inner, inner.events_by_target.get(&target), scope, range))
    }

    /// Events of one type, in commit order.
    pub fn events_by_type(
        &self,
        scope: Scope,
        event_type: &str,
        range: &TimeRange,
    ) -> Result<Vec<Event>> {
        let inner = self.read()?;
        Ok(collect(&inner, inner.events_by_type.get(event_type), scope, range))
    }

    /// Recompute an event's content hash and compare it to the stored
    /// one.
    pub fn verify_event(&self, id: EventId) -> Result<bool> {
        let inner = self.read()?;
        let event = inner
            .events_by_id
            .get(&id)
            .and_then(|&pos| inner.events.get(pos))
            .ok_or(StrataError::NotFound {
                operation: "event.verify",
                kind: "event",
                id: id.to_string(),
            })?;
        Ok(event.verify_integrity())
    }

    pub fn event_count(&self) -> Result<usize> {
        Ok(self.read()?.events.len())
    }

    // ── Webhook ingestion ────────────────────────────────────────

    /// Record an externally-originated fact (payment confirmation,
    /// order webhook, ...) as an `external.<source>` event.
    ///
    /// Deduplicates on `(source, idempotency_key)`: a replay returns the
    /// original event and appends nothing.
    pub fn ingest_external_event(
        &self,
        ctx: &ActorContext,
        source: &str,
        idempotency_key: &str,
        group_id: Option<GroupId>,
        payload: serde_json::Value,
    ) -> Result<Event> {
        const OP: &str = "event.ingest";
        if source.is_empty() || idempotency_key.is_empty() {
            return Err(StrataError::Validation {
                operation: OP,
                field: if source.is_empty() { "source" } else { "idempotency_key" }.to_string(),
                message: "must not be empty".to_string(),
            });
        }

        let digest = blake3::hash(format!("{source}:{idempotency_key}").as_bytes())
            .to_hex()
            .to_string();

        let mut inner = self.write()?;
        let mut txn = Txn::new(OP);
        txn.emit(
            Event::new(
                format!("external.{source}"),
                ctx.actor,
                None,
                group_id,
                payload,
            )
            .with_idempotency_key(digest),
        );
        txn.commit(&mut inner)
    }
}

fn collect(
    inner: &StoreInner,
    positions: Option<&Vec<usize>>,
    scope: Scope,
    range: &TimeRange,
) -> Vec<Event> {
    positions
        .map(|positions| {
            positions
                .iter()
                .filter_map(|&pos| inner.events.get(pos))
                .filter(|e| scope.admits(e.group_id))
                .filter(|e| range.contains(e.timestamp))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::NewGroup;
    use strata_core::config::StrataConfig;
    use strata_core::{ActorId, GroupSettings};

    fn store() -> OntologyStore {
        OntologyStore::new(StrataConfig::default())
    }

    fn ctx() -> ActorContext {
        ActorContext::new(ActorId::new())
    }

    fn group_in(store: &OntologyStore, slug: &str) -> GroupId {
        store
            .create_group(
                &ctx(),
                None,
                NewGroup {
                    slug: slug.to_string(),
                    name: slug.to_string(),
                    group_type: "organization".to_string(),
                    settings: GroupSettings::default(),
                },
            )
            .unwrap()
            .id
    }

    #[test]
    fn ingestion_is_idempotent_on_the_key() {
        let store = store();
        let actor = ctx();
        let acme = group_in(&store, "acme");

        let first = store
            .ingest_external_event(
                &actor,
                "shopify",
                "order-1001",
                Some(acme),
                serde_json::json!({"total": "41.00"}),
            )
            .unwrap();
        let replay = store
            .ingest_external_event(
                &actor,
                "shopify",
                "order-1001",
                Some(acme),
                serde_json::json!({"total": "41.00"}),
            )
            .unwrap();

        assert_eq!(first.id, replay.id);
        let ingested = store
            .events_by_type(Scope::Group(acme), "external.shopify", &TimeRange::default())
            .unwrap();
        assert_eq!(ingested.len(), 1);
    }

    #[test]
    fn same_key_under_another_source_is_a_new_fact() {
        let store = store();
        let actor = ctx();
        let acme = group_in(&store, "acme");

        let a = store
            .ingest_external_event(&actor, "shopify", "1001", Some(acme), serde_json::json!({}))
            .unwrap();
        let b = store
            .ingest_external_event(&actor, "stripe", "1001", Some(acme), serde_json::json!({}))
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn event_queries_respect_scope_and_range() {
        let store = store();
        let actor = ctx();
        let acme = group_in(&store, "acme");
        let other = group_in(&store, "other");

        store
            .ingest_external_event(&actor, "stripe", "a", Some(acme), serde_json::json!({}))
            .unwrap();
        store
            .ingest_external_event(&actor, "stripe", "b", Some(other), serde_json::json!({}))
            .unwrap();

        let acme_events = store
            .events_by_actor(Scope::Group(acme), actor.actor, &TimeRange::default())
            .unwrap();
        assert!(acme_events.iter().all(|e| e.group_id == Some(acme)));

        let all = store
            .events_by_actor(Scope::Platform, actor.actor, &TimeRange::default())
            .unwrap();
        assert!(all.len() > acme_events.len());

        let none = store
            .events_by_actor(
                Scope::Platform,
                actor.actor,
                &TimeRange {
                    from: Some(Utc::now() + chrono::TimeDelta::try_hours(1).unwrap()),
                    to: None,
                },
            )
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn stored_events_verify_and_are_ordered() {
        let store = store();
        let actor = ctx();
        let acme = group_in(&store, "acme");
        store
            .ingest_external_event(&actor, "stripe", "a", Some(acme), serde_json::json!({}))
            .unwrap();

        let events = store
            .events_by_actor(Scope::Platform, actor.actor, &TimeRange::default())
            .unwrap();
        for pair in events.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
        for event in &events {
            assert!(store.verify_event(event.id).unwrap());
        }
    }
}
