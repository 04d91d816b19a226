//! Knowledge dimension: labels and embeddings, wrapped in the same
//! audited unit of work as every other mutation.
//!
//! The store never computes embeddings. Vectors arrive pre-computed
//! from an external provider; this layer scopes them to the source
//! entity's tenant, accounts them against quota, and emits the audit
//! event atomically with the index write.

use chrono::Utc;

use strata_core::events::kind;
use strata_core::{
    ActorContext, EntityId, Event, GroupId, KnowledgeRecord, Result, StrataError,
};
use strata_knowledge::{EmbeddingUpsert, SearchFilters, SearchHit};

use crate::store::OntologyStore;
use crate::txn::{Change, Txn};

/// Caller-facing arguments for an embedding upsert; the tenant scope is
/// resolved from the source entity, never supplied.
#[derive(Debug, Clone)]
pub struct KnowledgeChunk {
    pub text: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub chunk_index: Option<u32>,
    pub source_field: Option<String>,
}

impl OntologyStore {
    // ── Writes ───────────────────────────────────────────────────

    /// Attach labels to an entity's knowledge record.
    pub fn attach_labels(
        &self,
        ctx: &ActorContext,
        entity_id: EntityId,
        labels: &[String],
    ) -> Result<KnowledgeRecord> {
        const OP: &str = "knowledge.attachLabels";
        let mut inner = self.write()?;

        let group = knowledge_scope(&inner, OP, entity_id)?;

        let mut txn = Txn::new(OP);
        txn.stage(Change::AttachLabels {
            group,
            entity: entity_id,
            labels: labels.to_vec(),
        });
        txn.emit(Event::new(
            kind::KNOWLEDGE_LABELS_ATTACHED,
            ctx.actor,
            Some(entity_id.0),
            Some(group),
            serde_json::json!({ "labels": labels }),
        ));
        txn.commit(&mut inner)?;

        inner
            .knowledge
            .label_record(entity_id)
            .cloned()
            .ok_or_else(|| StrataError::Internal("label record missing after commit".to_string()))
    }

    /// Insert or replace an embedding chunk for an entity.
    pub fn upsert_embedding(
        &self,
        ctx: &ActorContext,
        entity_id: EntityId,
        chunk: KnowledgeChunk,
    ) -> Result<KnowledgeRecord> {
        const OP: &str = "knowledge.upsertEmbedding";
        let mut inner = self.write()?;

        let group = knowledge_scope(&inner, OP, entity_id)?;

        let limit = inner.effective_quota(
            self.config(),
            group,
            |q| q.max_knowledge_records,
            |d| d.max_knowledge_records,
        );
        let chunk_index = chunk.chunk_index.unwrap_or(0);
        let replacing = inner
            .knowledge
            .chunk_record(entity_id, &chunk.model, chunk_index)
            .is_some();
        if !replacing && inner.knowledge.count_for_group(group) >= limit {
            return Err(StrataError::RateLimit {
                operation: OP,
                group_id: group.to_string(),
                quota: "max_knowledge_records",
                limit,
            });
        }

        let upsert = EmbeddingUpsert {
            group_id: group,
            source_entity_id: entity_id,
            text: chunk.text,
            vector: chunk.vector,
            model: chunk.model.clone(),
            chunk_index: chunk.chunk_index,
            source_field: chunk.source_field,
        };
        // Validate dimension before staging so the commit cannot fail
        // after the event is appended.
        inner.knowledge.check_upsert(&upsert)?;

        let dimension = upsert.vector.len();
        let mut txn = Txn::new(OP);
        txn.stage(Change::UpsertEmbedding(upsert));
        txn.emit(Event::new(
            kind::KNOWLEDGE_EMBEDDING_UPSERTED,
            ctx.actor,
            Some(entity_id.0),
            Some(group),
            serde_json::json!({
                "model": chunk.model,
                "chunk_index": chunk_index,
                "dimension": dimension,
            }),
        ));
        txn.commit(&mut inner)?;

        inner
            .knowledge
            .chunk_record(entity_id, &chunk.model, chunk_index)
            .cloned()
            .ok_or_else(|| StrataError::Internal("chunk record missing after commit".to_string()))
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Nearest neighbors within a tenant, under one embedding model.
    ///
    /// Runs a refresh first when the configured interval has elapsed, so
    /// the upsert-to-searchable lag stays bounded.
    pub fn search_knowledge(
        &self,
        group_id: GroupId,
        query: &[f32],
        model: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        let mut inner = self.write()?;
        let interval = self.config().knowledge.refresh_interval_secs;
        inner.knowledge.maybe_refresh(Utc::now(), interval);
        inner.knowledge.search(group_id, query, model, k, filters)
    }

    /// Entities in a tenant carrying a label.
    pub fn search_by_label(&self, group_id: GroupId, label: &str) -> Result<Vec<EntityId>> {
        let inner = self.read()?;
        Ok(inner.knowledge.search_by_label(group_id, label))
    }

    /// Force-promote pending embeddings into the searchable segment.
    pub fn refresh_knowledge(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.knowledge.refresh(Utc::now());
        Ok(())
    }
}

/// Knowledge is scoped by the source entity's group; platform-global
/// entities have no tenant to scope a record to.
fn knowledge_scope(
    inner: &crate::store::StoreInner,
    operation: &'static str,
    entity_id: EntityId,
) -> Result<GroupId> {
    let entity = inner.entities.get(&entity_id).ok_or(StrataError::NotFound {
        operation,
        kind: "entity",
        id: entity_id.to_string(),
    })?;
    entity.group_id.ok_or_else(|| StrataError::Validation {
        operation,
        field: "entity_id".to_string(),
        message: "platform-global entities cannot carry knowledge records".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::NewGroup;
    use crate::store::Scope;
    use crate::{NewEntity, TimeRange};
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

    fn entity_in(store: &OntologyStore, group: GroupId, name: &str) -> EntityId {
        store
            .create_entity(
                &ctx(),
                Some(group),
                NewEntity {
                    entity_type: "document".to_string(),
                    name: name.to_string(),
                    attributes: serde_json::Map::new(),
                },
            )
            .unwrap()
            .id
    }

    fn chunk(text: &str, vector: Vec<f32>, model: &str) -> KnowledgeChunk {
        KnowledgeChunk {
            text: text.to_string(),
            vector,
            model: model.to_string(),
            chunk_index: None,
            source_field: None,
        }
    }

    #[test]
    fn labels_scope_to_the_source_entity_group() {
        let store = store();
        let actor = ctx();
        let acme = group_in(&store, "acme");
        let doc = entity_in(&store, acme, "guide");

        let record = store
            .attach_labels(&actor, doc, &["onboarding".to_string()])
            .unwrap();
        assert_eq!(record.group_id, acme);
        assert_eq!(store.search_by_label(acme, "onboarding").unwrap(), vec![doc]);
        assert!(store
            .search_by_label(group_in(&store, "other"), "onboarding")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn model_mismatch_leaves_no_event_behind() {
        let store = store();
        let actor = ctx();
        let acme = group_in(&store, "acme");
        let doc = entity_in(&store, acme, "guide");

        store
            .upsert_embedding(&actor, doc, chunk("a", vec![1.0, 0.0, 0.0], "model-v1"))
            .unwrap();
        let err = store
            .upsert_embedding(&actor, doc, chunk("b", vec![1.0, 0.0], "model-v1"))
            .unwrap_err();
        assert!(matches!(err, StrataError::Validation { .. }));

        let events = store
            .events_by_type(
                Scope::Group(acme),
                kind::KNOWLEDGE_EMBEDDING_UPSERTED,
                &TimeRange::default(),
            )
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn search_stays_model_scoped() {
        let store = store();
        let actor = ctx();
        let acme = group_in(&store, "acme");
        let doc = entity_in(&store, acme, "guide");

        store
            .upsert_embedding(&actor, doc, chunk("text", vec![1.0, 0.0], "model-v1"))
            .unwrap();
        store
            .upsert_embedding(&actor, doc, chunk("text2", vec![0.0, 1.0, 0.0], "model-v2"))
            .unwrap();
        store.refresh_knowledge().unwrap();

        let hits = store
            .search_knowledge(acme, &[1.0, 0.0], "model-v1", 5, &SearchFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        let record = store.get_entity(hits[0].entity_id).unwrap();
        assert_eq!(record.id, doc);
    }

    #[test]
    fn knowledge_quota_counts_new_records_only() {
        let config = StrataConfig {
            quotas: strata_core::config::QuotaDefaults {
                max_knowledge_records: 1,
                ..Default::default()
            },
            ..StrataConfig::default()
        };
        let store = OntologyStore::new(config);
        let actor = ctx();
        let acme = group_in(&store, "acme");
        let doc = entity_in(&store, acme, "guide");

        store
            .upsert_embedding(&actor, doc, chunk("v1", vec![1.0, 0.0], "m"))
            .unwrap();
        // Replacing the same chunk is not a new record.
        store
            .upsert_embedding(&actor, doc, chunk("v2", vec![0.0, 1.0], "m"))
            .unwrap();

        let err = store
            .upsert_embedding(
                &actor,
                doc,
                KnowledgeChunk {
                    chunk_index: Some(1),
                    ..chunk("v3", vec![1.0, 1.0], "m")
                },
            )
            .unwrap_err();
        assert!(matches!(err, StrataError::RateLimit { .. }));
    }

    #[test]
    fn platform_global_entities_carry_no_knowledge() {
        let store = store();
        let actor = ctx();
        let global = store
            .create_entity(
                &actor,
                None,
                NewEntity {
                    entity_type: "template".to_string(),
                    name: "shared".to_string(),
                    attributes: serde_json::Map::new(),
                },
            )
            .unwrap();

        let err = store
            .attach_labels(&actor, global.id, &["x".to_string()])
            .unwrap_err();
        assert!(matches!(err, StrataError::Validation { .. }));
    }
}
