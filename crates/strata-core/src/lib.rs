//! strata-core: Shared types, configuration, and error handling for the Strata ontology store.
//!
//! This crate provides the foundational types used across all Strata components:
//! - Identifier newtypes and tenant-scoping containers (groups)
//! - Entity, relationship, and knowledge record types for the ontology
//! - Audit event types with tamper-evident content hashing
//! - Configuration management
//! - The common error taxonomy

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Result, StrataError};
pub use events::{Event, EventId};
pub use types::{
    ActorContext, ActorId, Entity, EntityId, EntityStatus, Group, GroupId, GroupSettings,
    GroupStatus, KnowledgeId, KnowledgeKind, KnowledgeRecord, QuotaSettings, RelationId,
    Relationship,
};
