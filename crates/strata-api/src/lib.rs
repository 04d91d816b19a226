//! strata-api: The typed RPC surface of the Strata ontology store.
//!
//! External collaborators — UI layers, domain services, integrations —
//! talk to the store through three contracts:
//! - `mutate(operation, args)` for the registered mutation set,
//! - `query(operation, args)` with the tenant-first invariant enforced
//!   here, not in callers,
//! - `ingest_external_event(source, key, payload)` for recording
//!   externally-originated facts idempotently.
//!
//! Every call carries an explicit [`strata_core::ActorContext`]; the
//! authorization evaluator runs before anything touches the store.

pub mod mutate;
pub mod retry;
pub mod router;
pub mod service;

pub use mutate::MutationReceipt;
pub use router::QueryResult;
pub use service::OntologyService;
