//! Error taxonomy for the Strata ontology store.
//!
//! Every variant names the triggering operation and the offending
//! field/id so calling services can render actionable messages without
//! the store leaking storage internals. Nothing in the store swallows
//! these; only `Transient` is retried internally before surfacing.

use thiserror::Error;

/// Top-level error type for the Strata platform.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("{kind} not found: {id} (operation: {operation})")]
    NotFound {
        operation: &'static str,
        kind: &'static str,
        id: String,
    },

    #[error("Actor {actor} is not authorized for {operation} on {resource}")]
    Unauthorized {
        operation: String,
        actor: String,
        resource: String,
    },

    #[error("Validation failed for {operation}, field `{field}`: {message}")]
    Validation {
        operation: &'static str,
        field: String,
        message: String,
    },

    #[error("Invalid sequence in {operation} for scope {scope}: {message}")]
    InvalidSequence {
        operation: &'static str,
        scope: String,
        message: String,
    },

    #[error(
        "Ordering conflict in {operation} for scope {scope}: expected version {expected}, current is {current}"
    )]
    Conflict {
        operation: &'static str,
        scope: String,
        expected: u64,
        current: u64,
    },

    #[error("Cycle detected in {operation}: group {group_id} would become its own ancestor")]
    CycleDetected {
        operation: &'static str,
        group_id: String,
    },

    #[error("Unsupported operation: {operation}")]
    UnsupportedOperation { operation: String },

    #[error("Quota exceeded in {operation}: group {group_id} reached the {quota} limit of {limit}")]
    RateLimit {
        operation: &'static str,
        group_id: String,
        quota: &'static str,
        limit: u64,
    },

    #[error("Transient infrastructure error in {operation}: {message}")]
    Transient {
        operation: &'static str,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Whether a bounded retry may resolve this error.
    pub fn is_transient(&self) -> bool {
        matches!(self, StrataError::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_operation_and_offender() {
        let err = StrataError::RateLimit {
            operation: "entity.create",
            group_id: "acme".to_string(),
            quota: "max_entities",
            limit: 100,
        };
        let text = err.to_string();
        assert!(text.contains("entity.create"));
        assert!(text.contains("acme"));
        assert!(text.contains("max_entities"));
    }

    #[test]
    fn only_transient_is_retryable() {
        let transient = StrataError::Transient {
            operation: "snapshot.save",
            message: "disk briefly unavailable".to_string(),
        };
        assert!(transient.is_transient());

        let not_found = StrataError::NotFound {
            operation: "entity.get",
            kind: "entity",
            id: "e-1".to_string(),
        };
        assert!(!not_found.is_transient());
    }
}
