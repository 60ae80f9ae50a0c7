//! Services layer for affiliation-service.
//!
//! Storage backends, the authorization engine, cascade planning and
//! execution, and the service entry points built on top of them.

pub mod affiliation;
pub mod authz;
mod database;
pub mod error;
pub mod executor;
pub mod locks;
mod memory;
pub mod metrics;
pub mod planner;
pub mod policy;
pub mod registry;
pub mod store;

pub use affiliation::AffiliationService;
pub use authz::{AuthorizationEngine, Denial, Operation};
pub use database::{PgStore, PgTransaction};
pub use error::AffiliationError;
pub use executor::{CascadeExecutor, CascadeResult};
pub use locks::{SubtreeGuard, SubtreeLocks};
pub use memory::MemoryStore;
pub use planner::{AffectedAffiliation, AffectedIdentity, CascadeKind, CascadePlanner, ImpactPlan};
pub use policy::{PolicySource, RemovalPolicy, SharedPolicy};
pub use registry::AffiliationRegistry;
pub use store::{AffiliationStore, StoreError, StoreTransaction};
