//! service-core: Shared infrastructure for the affiliation services.
pub mod config;
pub mod error;
pub mod observability;
