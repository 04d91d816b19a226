//! Runtime-pluggable schema registry.
//!
//! Entity and relationship types are open strings; what a registered
//! type's attribute bag may look like is decided by the validator its
//! module registers here, never by the store. Unregistered types pass
//! validation unchanged — that is what keeps the store migration-free.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use strata_core::{Result, StrataError};

/// Per-type attribute validation, supplied by the module that owns the
/// type. Implemented for plain closures.
pub trait AttributeValidator: Send + Sync {
    fn validate(
        &self,
        operation: &'static str,
        attributes: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()>;
}

impl<F> AttributeValidator for F
where
    F: Fn(&'static str, &serde_json::Map<String, serde_json::Value>) -> Result<()> + Send + Sync,
{
    fn validate(
        &self,
        operation: &'static str,
        attributes: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        self(operation, attributes)
    }
}

/// Declared behavior of a relationship type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelationSpec {
    /// Ordered families keep a gapless sequence per (parent, type) scope.
    pub ordered: bool,
    /// Whether endpoints may belong to different tenants.
    pub cross_tenant: bool,
}

/// Registry of entity validators and relationship specs, keyed by the
/// open type string. Registration happens at runtime; the store only
/// ever resolves.
#[derive(Default)]
pub struct SchemaRegistry {
    entity_validators: RwLock<HashMap<String, Arc<dyn AttributeValidator>>>,
    relation_specs: RwLock<HashMap<String, RelationSpec>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_entity_type(
        &self,
        entity_type: impl Into<String>,
        validator: Arc<dyn AttributeValidator>,
    ) {
        let entity_type = entity_type.into();
        tracing::debug!(entity_type, "Entity type registered");
        if let Ok(mut validators) = self.entity_validators.write() {
            validators.insert(entity_type, validator);
        }
    }

    pub fn register_relation_type(&self, relation_type: impl Into<String>, spec: RelationSpec) {
        let relation_type = relation_type.into();
        tracing::debug!(relation_type, ordered = spec.ordered, "Relation type registered");
        if let Ok(mut specs) = self.relation_specs.write() {
            specs.insert(relation_type, spec);
        }
    }

    /// Validate an attribute bag against the type's registered
    /// validator. Unregistered types accept any bag.
    pub fn validate_attributes(
        &self,
        operation: &'static str,
        entity_type: &str,
        attributes: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<()> {
        let validator = {
            let validators = self
                .entity_validators
                .read()
                .map_err(|_| StrataError::Internal("schema registry lock poisoned".to_string()))?;
            validators.get(entity_type).cloned()
        };
        match validator {
            Some(validator) => validator.validate(operation, attributes),
            None => Ok(()),
        }
    }

    /// The declared spec for a relationship type; unregistered types are
    /// unordered and same-tenant.
    pub fn relation_spec(&self, relation_type: &str) -> RelationSpec {
        self.relation_specs
            .read()
            .ok()
            .and_then(|specs| specs.get(relation_type).copied())
            .unwrap_or_default()
    }
}
