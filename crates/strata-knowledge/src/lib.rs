//! strata-knowledge: Label attachment and vector similarity search.
//!
//! The index stores two kinds of knowledge record per source entity:
//! label sets for categorical lookup, and text chunks with pre-computed
//! embedding vectors for nearest-neighbor search. Vectors are never
//! generated here — an external embedding provider hands them over.
//!
//! Searches are tenant-first: the group filter and any metadata filters
//! prune candidates *before* ranking, so cross-tenant neighbors never
//! enter a result set, even transiently. Upserts land in a pending
//! segment and become searchable on the next refresh, bounding the
//! upsert-to-searchable lag.

pub mod index;
pub mod similarity;

pub use index::{EmbeddingUpsert, KnowledgeIndex, SearchFilters, SearchHit};
