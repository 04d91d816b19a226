//! The service wrapper: store handle, ingestion, vector search, and
//! snapshot persistence with retry.

use std::path::Path;
use std::sync::Arc;

use strata_auth::{authorize, Action, Directory, ResourceRef};
use strata_core::config::StrataConfig;
use strata_core::{ActorContext, EntityId, Event, GroupId, Result, StrataError};
use strata_knowledge::{SearchFilters, SearchHit};
use strata_store::{OntologyStore, SchemaRegistry, Scope, TimeRange};
use uuid::Uuid;

use crate::retry::with_backoff;

/// The Strata ontology service. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct OntologyService {
    store: Arc<OntologyStore>,
}

impl OntologyService {
    pub fn new(config: StrataConfig) -> Self {
        Self {
            store: Arc::new(OntologyStore::new(config)),
        }
    }

    pub fn with_store(store: OntologyStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Open the snapshot at `path` if it exists, otherwise start empty.
    pub fn open(config: StrataConfig, schemas: SchemaRegistry, path: &Path) -> Result<Self> {
        let store = if path.exists() {
            OntologyStore::load_snapshot(path, config, schemas)?
        } else {
            OntologyStore::with_schemas(config, schemas)
        };
        Ok(Self::with_store(store))
    }

    pub fn store(&self) -> &OntologyStore {
        &self.store
    }

    // ── Webhook ingestion contract ───────────────────────────────

    /// Record an externally-originated fact without granting the caller
    /// entity-write access. Idempotent on `(source, idempotency_key)`.
    ///
    /// The payload may carry a `group_id` to scope the fact to a tenant.
    pub async fn ingest_external_event(
        &self,
        ctx: &ActorContext,
        source: &str,
        idempotency_key: &str,
        payload: serde_json::Value,
    ) -> Result<Event> {
        const OP: &str = "event.ingest";

        // Fail closed: completely unknown principals record nothing.
        if !self.store.is_known_actor(&ctx.actor) {
            return Err(StrataError::Unauthorized {
                operation: OP.to_string(),
                actor: ctx.actor.to_string(),
                resource: format!("external.{source}"),
            });
        }

        let group_id = match payload.get("group_id").and_then(|v| v.as_str()) {
            Some(raw) => Some(parse_group_id(OP, raw)?),
            None => None,
        };

        self.store
            .ingest_external_event(ctx, source, idempotency_key, group_id, payload)
    }

    // ── Vector search contract ───────────────────────────────────

    /// `search(groupId, vector, model, k, filters) -> [(entityId, score)]`
    pub async fn search(
        &self,
        ctx: &ActorContext,
        group_id: GroupId,
        vector: &[f32],
        model: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<(EntityId, f32)>> {
        authorize(
            self.store.as_ref(),
            ctx,
            "knowledge.search",
            Action::Read,
            Some(&ResourceRef::new(group_id.0, Some(group_id))),
        )?;

        let hits = self
            .store
            .search_knowledge(group_id, vector, model, k, filters)?;
        Ok(hits
            .into_iter()
            .map(|SearchHit { entity_id, score, .. }| (entity_id, score))
            .collect())
    }

    // ── Persistence ──────────────────────────────────────────────

    /// Save a snapshot, retrying transient IO with bounded backoff.
    pub async fn persist(&self, path: &Path) -> Result<()> {
        let policy = self.store.config().retry.clone();
        with_backoff(&policy, "snapshot.save", || async {
            self.store.save_snapshot(path).map_err(|e| match e {
                StrataError::Io(io) => StrataError::Transient {
                    operation: "snapshot.save",
                    message: io.to_string(),
                },
                other => other,
            })
        })
        .await
    }

    // ── Shared helpers ───────────────────────────────────────────

    /// The latest audit event targeting `id`. Every mutation emits
    /// exactly one, so for the caller that just committed, this is its
    /// receipt.
    pub(crate) fn latest_event_for(&self, id: Uuid) -> Result<Event> {
        self.store
            .events_by_target(Scope::Platform, id, &TimeRange::default())?
            .pop()
            .ok_or_else(|| {
                StrataError::Internal(format!("no audit event recorded for target {id}"))
            })
    }
}

pub(crate) fn parse_group_id(operation: &'static str, raw: &str) -> Result<GroupId> {
    Uuid::parse_str(raw)
        .map(GroupId)
        .map_err(|_| StrataError::Validation {
            operation,
            field: "group_id".to_string(),
            message: format!("`{raw}` is not a valid id"),
        })
}
