//! The in-memory knowledge index.
//!
//! Plain data structure with `&mut self` mutators — the owning store
//! serializes access, so no interior locking here. Embeddings are
//! bucketed by (group, model); a model's dimension is fixed by its
//! first upsert and enforced on every later one.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Utc};

use strata_core::{
    EntityId, GroupId, KnowledgeId, KnowledgeKind, KnowledgeRecord, Result, StrataError,
};

use crate::similarity::{dot, normalize};

/// Arguments for an embedding upsert. The vector arrives pre-computed.
#[derive(Debug, Clone)]
pub struct EmbeddingUpsert {
    pub group_id: GroupId,
    pub source_entity_id: EntityId,
    pub text: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub chunk_index: Option<u32>,
    pub source_field: Option<String>,
}

/// Metadata filters applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    pub source_entity_id: Option<EntityId>,
    pub kind: Option<KnowledgeKind>,
}

/// A ranked nearest-neighbor result.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub entity_id: EntityId,
    pub record_id: KnowledgeId,
    pub score: f32,
}

/// A searchable posting: one normalized vector with its scope keys.
#[derive(Debug, Clone)]
struct Posting {
    record_id: KnowledgeId,
    entity_id: EntityId,
    group_id: GroupId,
    model: String,
    kind: KnowledgeKind,
    vector: Vec<f32>,
}

/// Label sets and embedding chunks attached to source entities.
#[derive(Debug, Default)]
pub struct KnowledgeIndex {
    records: BTreeMap<KnowledgeId, KnowledgeRecord>,
    /// One label record per source entity.
    label_records: BTreeMap<EntityId, KnowledgeId>,
    /// Chunk upsert key: (entity, model, chunk index).
    chunk_keys: BTreeMap<(EntityId, String, u32), KnowledgeId>,
    /// (group, label) -> entities carrying it.
    label_lookup: BTreeMap<(GroupId, String), BTreeSet<EntityId>>,
    /// Dimension fixed by the first upsert under each model.
    model_dimensions: BTreeMap<String, usize>,
    /// Searchable segment.
    committed: Vec<Posting>,
    /// Upserts awaiting the next refresh.
    pending: Vec<Posting>,
    last_refresh: Option<DateTime<Utc>>,
}

impl KnowledgeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Labels ───────────────────────────────────────────────────

    /// Attach labels to an entity's label record, creating it on first
    /// use. Labels accumulate; attaching an existing label is a no-op.
    pub fn attach_labels(
        &mut self,
        group_id: GroupId,
        entity_id: EntityId,
        labels: &[String],
    ) -> KnowledgeRecord {
        let now = Utc::now();
        let record_id = *self.label_records.entry(entity_id).or_insert_with(|| {
            let id = KnowledgeId::new();
            self.records.insert(
                id,
                KnowledgeRecord {
                    id,
                    group_id,
                    kind: KnowledgeKind::Label,
                    text: String::new(),
                    embedding: None,
                    embedding_model: None,
                    embedding_dimension: None,
                    source_entity_id: entity_id,
                    source_field: None,
                    chunk_index: None,
                    labels: BTreeSet::new(),
                    created_at: now,
                    updated_at: now,
                },
            );
            id
        });

        let record = self.records.get_mut(&record_id).expect("label record exists");
        for label in labels {
            record.labels.insert(label.clone());
            self.label_lookup
                .entry((group_id, label.clone()))
                .or_default()
                .insert(entity_id);
        }
        record.updated_at = now;
        record.clone()
    }

    /// Entities in `group_id` carrying `label`.
    pub fn search_by_label(&self, group_id: GroupId, label: &str) -> Vec<EntityId> {
        self.label_lookup
            .get(&(group_id, label.to_string()))
            .map(|entities| entities.iter().copied().collect())
            .unwrap_or_default()
    }

    // ── Embeddings ───────────────────────────────────────────────

    /// Validate an upsert without applying it: non-empty vector, and a
    /// dimension consistent with what the model already stores. Lets a
    /// caller fail fast before committing anything else.
    pub fn check_upsert(&self, upsert: &EmbeddingUpsert) -> Result<()> {
        const OP: &str = "knowledge.upsertEmbedding";

        if upsert.vector.is_empty() {
            return Err(StrataError::Validation {
                operation: OP,
                field: "vector".to_string(),
                message: "embedding vector must not be empty".to_string(),
            });
        }
        if let Some(&expected) = self.model_dimensions.get(&upsert.model) {
            if expected != upsert.vector.len() {
                return Err(StrataError::Validation {
                    operation: OP,
                    field: "vector".to_string(),
                    message: format!(
                        "model {} stores {expected}-dimensional vectors, got {}",
                        upsert.model,
                        upsert.vector.len()
                    ),
                });
            }
        }
        Ok(())
    }

    /// Insert or replace the chunk keyed by (entity, model, chunk index).
    ///
    /// The new posting lands in the pending segment; it becomes
    /// searchable on the next [`refresh`](Self::refresh).
    pub fn upsert_embedding(&mut self, upsert: EmbeddingUpsert) -> Result<KnowledgeRecord> {
        self.check_upsert(&upsert)?;

        let dimension = upsert.vector.len();
        self.model_dimensions
            .entry(upsert.model.clone())
            .or_insert(dimension);

        let now = Utc::now();
        let chunk = upsert.chunk_index.unwrap_or(0);
        let key = (upsert.source_entity_id, upsert.model.clone(), chunk);

        let record_id = match self.chunk_keys.get(&key) {
            Some(&existing) => {
                // Replacement: drop the stale posting wherever it sits.
                self.committed.retain(|p| p.record_id != existing);
                self.pending.retain(|p| p.record_id != existing);
                existing
            }
            None => {
                let id = KnowledgeId::new();
                self.chunk_keys.insert(key, id);
                id
            }
        };

        let record = KnowledgeRecord {
            id: record_id,
            group_id: upsert.group_id,
            kind: KnowledgeKind::Chunk,
            text: upsert.text,
            embedding: Some(upsert.vector.clone()),
            embedding_model: Some(upsert.model.clone()),
            embedding_dimension: Some(dimension),
            source_entity_id: upsert.source_entity_id,
            source_field: upsert.source_field,
            chunk_index: Some(chunk),
            labels: BTreeSet::new(),
            created_at: self
                .records
                .get(&record_id)
                .map(|r| r.created_at)
                .unwrap_or(now),
            updated_at: now,
        };
        self.records.insert(record_id, record.clone());

        self.pending.push(Posting {
            record_id,
            entity_id: upsert.source_entity_id,
            group_id: upsert.group_id,
            model: upsert.model,
            kind: KnowledgeKind::Chunk,
            vector: normalize(&upsert.vector),
        });

        tracing::debug!(record_id = %record_id, pending = self.pending.len(), "Embedding staged");
        Ok(record)
    }

    /// Promote pending postings into the searchable segment.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        if !self.pending.is_empty() {
            tracing::debug!(promoted = self.pending.len(), "Knowledge index refreshed");
            self.committed.append(&mut self.pending);
        }
        self.last_refresh = Some(now);
    }

    /// Refresh if the configured interval has elapsed. Returns whether a
    /// refresh ran.
    pub fn maybe_refresh(&mut self, now: DateTime<Utc>, interval_secs: u64) -> bool {
        let due = match self.last_refresh {
            None => true,
            Some(last) => match TimeDelta::try_seconds(interval_secs as i64) {
                Some(interval) => now - last >= interval,
                None => true,
            },
        };
        if due {
            self.refresh(now);
        }
        due
    }

    /// Nearest neighbors for `query` among `group_id`'s postings under
    /// `model`, ranked by cosine similarity.
    ///
    /// The tenant and metadata filters run before any distance is
    /// computed. One hit per entity: the best-scoring chunk wins.
    pub fn search(
        &self,
        group_id: GroupId,
        query: &[f32],
        model: &str,
        k: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>> {
        const OP: &str = "knowledge.search";

        if let Some(&expected) = self.model_dimensions.get(model) {
            if expected != query.len() {
                return Err(StrataError::Validation {
                    operation: OP,
                    field: "vector".to_string(),
                    message: format!(
                        "model {model} stores {expected}-dimensional vectors, got {}",
                        query.len()
                    ),
                });
            }
        }

        let query = normalize(query);
        let mut best_per_entity: BTreeMap<EntityId, SearchHit> = BTreeMap::new();

        for posting in &self.committed {
            // Filter first: tenant, model, and metadata predicates prune
            // the candidate set before any similarity is computed.
            if posting.group_id != group_id || posting.model != model {
                continue;
            }
            if let Some(source) = filters.source_entity_id {
                if posting.entity_id != source {
                    continue;
                }
            }
            if let Some(kind) = filters.kind {
                if posting.kind != kind {
                    continue;
                }
            }

            let score = dot(&query, &posting.vector);
            match best_per_entity.get(&posting.entity_id) {
                Some(existing) if existing.score >= score => {}
                _ => {
                    best_per_entity.insert(
                        posting.entity_id,
                        SearchHit {
                            entity_id: posting.entity_id,
                            record_id: posting.record_id,
                            score,
                        },
                    );
                }
            }
        }

        let mut hits: Vec<SearchHit> = best_per_entity.into_values().collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    // ── Introspection & snapshot support ─────────────────────────

    pub fn record(&self, id: KnowledgeId) -> Option<&KnowledgeRecord> {
        self.records.get(&id)
    }

    /// The label record attached to an entity, if any.
    pub fn label_record(&self, entity_id: EntityId) -> Option<&KnowledgeRecord> {
        self.label_records
            .get(&entity_id)
            .and_then(|id| self.records.get(id))
    }

    /// The chunk record keyed by (entity, model, chunk index), if any.
    pub fn chunk_record(
        &self,
        entity_id: EntityId,
        model: &str,
        chunk_index: u32,
    ) -> Option<&KnowledgeRecord> {
        self.chunk_keys
            .get(&(entity_id, model.to_string(), chunk_index))
            .and_then(|id| self.records.get(id))
    }

    /// Total records scoped to a group (quota accounting).
    pub fn count_for_group(&self, group_id: GroupId) -> u64 {
        self.records.values().filter(|r| r.group_id == group_id).count() as u64
    }

    /// All records, for snapshotting.
    pub fn export(&self) -> Vec<KnowledgeRecord> {
        self.records.values().cloned().collect()
    }

    /// Rebuild the index from snapshot records. Everything imported is
    /// immediately searchable.
    pub fn import(records: Vec<KnowledgeRecord>, now: DateTime<Utc>) -> Self {
        let mut index = KnowledgeIndex::new();
        for record in records {
            match record.kind {
                KnowledgeKind::Label => {
                    index.label_records.insert(record.source_entity_id, record.id);
                    for label in &record.labels {
                        index
                            .label_lookup
                            .entry((record.group_id, label.clone()))
                            .or_default()
                            .insert(record.source_entity_id);
                    }
                }
                KnowledgeKind::Chunk => {
                    if let (Some(embedding), Some(model)) =
                        (record.embedding.as_ref(), record.embedding_model.as_ref())
                    {
                        index
                            .model_dimensions
                            .entry(model.clone())
                            .or_insert(embedding.len());
                        index.chunk_keys.insert(
                            (
                                record.source_entity_id,
                                model.clone(),
                                record.chunk_index.unwrap_or(0),
                            ),
                            record.id,
                        );
                        index.committed.push(Posting {
                            record_id: record.id,
                            entity_id: record.source_entity_id,
                            group_id: record.group_id,
                            model: model.clone(),
                            kind: KnowledgeKind::Chunk,
                            vector: normalize(embedding),
                        });
                    }
                }
            }
            index.records.insert(record.id, record);
        }
        index.last_refresh = Some(now);
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upsert(
        group: GroupId,
        entity: EntityId,
        text: &str,
        vector: Vec<f32>,
        model: &str,
    ) -> EmbeddingUpsert {
        EmbeddingUpsert {
            group_id: group,
            source_entity_id: entity,
            text: text.to_string(),
            vector,
            model: model.to_string(),
            chunk_index: None,
            source_field: None,
        }
    }

    fn refreshed(index: &mut KnowledgeIndex) {
        index.refresh(Utc::now());
    }

    #[test]
    fn labels_accumulate_and_resolve() {
        let group = GroupId::new();
        let entity = EntityId::new();
        let mut index = KnowledgeIndex::new();

        index.attach_labels(group, entity, &["funnel".to_string(), "draft".to_string()]);
        let record = index.attach_labels(group, entity, &["funnel".to_string()]);

        assert_eq!(record.labels.len(), 2);
        assert_eq!(index.search_by_label(group, "funnel"), vec![entity]);
        assert!(index.search_by_label(GroupId::new(), "funnel").is_empty());
    }

    #[test]
    fn model_dimension_is_fixed_by_first_upsert() {
        let group = GroupId::new();
        let entity = EntityId::new();
        let mut index = KnowledgeIndex::new();

        index
            .upsert_embedding(upsert(group, entity, "a", vec![1.0, 0.0, 0.0], "model-v1"))
            .unwrap();

        let err = index
            .upsert_embedding(upsert(group, entity, "b", vec![1.0, 0.0], "model-v1"))
            .unwrap_err();
        assert!(matches!(err, StrataError::Validation { .. }));

        // A different model may use a different dimension.
        index
            .upsert_embedding(upsert(group, entity, "c", vec![1.0, 0.0], "model-v2"))
            .unwrap();
    }

    #[test]
    fn search_is_scoped_by_model() {
        let group = GroupId::new();
        let e1 = EntityId::new();
        let e2 = EntityId::new();
        let mut index = KnowledgeIndex::new();

        index
            .upsert_embedding(upsert(group, e1, "v1 text", vec![1.0, 0.0], "model-v1"))
            .unwrap();
        index
            .upsert_embedding(upsert(group, e2, "v2 text", vec![1.0, 0.0], "model-v2"))
            .unwrap();
        refreshed(&mut index);

        let hits = index
            .search(group, &[1.0, 0.0], "model-v1", 10, &SearchFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, e1);
    }

    #[test]
    fn search_never_crosses_groups() {
        let home = GroupId::new();
        let other = GroupId::new();
        let mine = EntityId::new();
        let theirs = EntityId::new();
        let mut index = KnowledgeIndex::new();

        index
            .upsert_embedding(upsert(home, mine, "mine", vec![1.0, 0.0], "m"))
            .unwrap();
        // The foreign vector is an exact match for the query — it must
        // still never surface.
        index
            .upsert_embedding(upsert(other, theirs, "theirs", vec![0.6, 0.8], "m"))
            .unwrap();
        refreshed(&mut index);

        let hits = index
            .search(home, &[0.6, 0.8], "m", 10, &SearchFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, mine);
    }

    #[test]
    fn pending_upserts_are_invisible_until_refresh() {
        let group = GroupId::new();
        let entity = EntityId::new();
        let mut index = KnowledgeIndex::new();

        index
            .upsert_embedding(upsert(group, entity, "staged", vec![1.0, 0.0], "m"))
            .unwrap();

        let before = index
            .search(group, &[1.0, 0.0], "m", 10, &SearchFilters::default())
            .unwrap();
        assert!(before.is_empty());

        refreshed(&mut index);
        let after = index
            .search(group, &[1.0, 0.0], "m", 10, &SearchFilters::default())
            .unwrap();
        assert_eq!(after.len(), 1);
    }

    #[test]
    fn upsert_replaces_chunk_in_place() {
        let group = GroupId::new();
        let entity = EntityId::new();
        let mut index = KnowledgeIndex::new();

        let first = index
            .upsert_embedding(upsert(group, entity, "old", vec![1.0, 0.0], "m"))
            .unwrap();
        refreshed(&mut index);

        let second = index
            .upsert_embedding(upsert(group, entity, "new", vec![0.0, 1.0], "m"))
            .unwrap();
        assert_eq!(first.id, second.id);
        refreshed(&mut index);

        let hits = index
            .search(group, &[0.0, 1.0], "m", 10, &SearchFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(index.record(first.id).unwrap().text, "new");
    }

    #[test]
    fn ranking_orders_by_similarity() {
        let group = GroupId::new();
        let near = EntityId::new();
        let far = EntityId::new();
        let mut index = KnowledgeIndex::new();

        index
            .upsert_embedding(upsert(group, near, "near", vec![0.9, 0.1], "m"))
            .unwrap();
        index
            .upsert_embedding(upsert(group, far, "far", vec![0.1, 0.9], "m"))
            .unwrap();
        refreshed(&mut index);

        let hits = index
            .search(group, &[1.0, 0.0], "m", 2, &SearchFilters::default())
            .unwrap();
        assert_eq!(hits[0].entity_id, near);
        assert_eq!(hits[1].entity_id, far);
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn source_entity_filter_applies_before_ranking() {
        let group = GroupId::new();
        let wanted = EntityId::new();
        let other = EntityId::new();
        let mut index = KnowledgeIndex::new();

        index
            .upsert_embedding(upsert(group, wanted, "wanted", vec![0.1, 0.9], "m"))
            .unwrap();
        index
            .upsert_embedding(upsert(group, other, "other", vec![1.0, 0.0], "m"))
            .unwrap();
        refreshed(&mut index);

        let filters = SearchFilters {
            source_entity_id: Some(wanted),
            kind: None,
        };
        let hits = index.search(group, &[1.0, 0.0], "m", 10, &filters).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity_id, wanted);
    }

    #[test]
    fn export_import_roundtrip_preserves_search() {
        let group = GroupId::new();
        let entity = EntityId::new();
        let mut index = KnowledgeIndex::new();

        index.attach_labels(group, entity, &["kb".to_string()]);
        index
            .upsert_embedding(upsert(group, entity, "text", vec![1.0, 0.0], "m"))
            .unwrap();
        refreshed(&mut index);

        let restored = KnowledgeIndex::import(index.export(), Utc::now());
        assert_eq!(restored.search_by_label(group, "kb"), vec![entity]);
        let hits = restored
            .search(group, &[1.0, 0.0], "m", 10, &SearchFilters::default())
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
