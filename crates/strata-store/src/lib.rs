//! strata-store: The Strata ontology substrate.
//!
//! One store holds all five ontology dimensions — groups, entities,
//! relationships, events, knowledge — behind a single writer lock.
//! Mutations are request-scoped atomic units: validation, the record
//! write, and exactly one audit event commit together or not at all.
//! New entity/relationship/event types are open string tags, so the
//! store never needs a schema migration; attribute shapes are owned by
//! the pluggable [`schema::SchemaRegistry`].

pub mod entities;
pub mod groups;
pub mod knowledge;
pub mod log;
pub mod persist;
pub mod relations;
pub mod schema;
pub mod store;
mod txn;

pub use entities::{EntityFilter, EntityPatch, NewEntity, Page, PageRequest};
pub use groups::NewGroup;
pub use knowledge::KnowledgeChunk;
pub use log::TimeRange;
pub use persist::Snapshot;
pub use schema::{AttributeValidator, RelationSpec, SchemaRegistry};
pub use store::{OntologyStore, Scope};
