//! Affiliation Service - hierarchical affiliation management for a
//! certificate authority, with cascading identity and certificate changes.

pub mod config;
pub mod models;
pub mod services;

use service_core::error::AppError;
use std::sync::Arc;
use tracing::info;

use config::{AffiliationConfig, StoreBackend};
use services::{AffiliationService, AffiliationStore, MemoryStore, PgStore, SharedPolicy};

/// Install tracing as configured.
pub fn init_observability(config: &AffiliationConfig) -> Result<(), AppError> {
    service_core::observability::init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
}

/// Wire the configured store into an [`AffiliationService`].
///
/// The returned [`SharedPolicy`] is the handle the service reads its removal
/// switches from; changes to it apply to the next request.
pub async fn build_service(
    config: &AffiliationConfig,
) -> Result<(AffiliationService, SharedPolicy), AppError> {
    config.validate()?;
    services::metrics::init_metrics();

    let store: Arc<dyn AffiliationStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory affiliation store");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Postgres => {
            let url = config.store.url.as_deref().ok_or_else(|| {
                AppError::ConfigError(anyhow::anyhow!("Postgres store requires a URL"))
            })?;
            let store = PgStore::connect(
                url,
                config.store.max_connections,
                config.store.min_connections,
            )
            .await?;
            store.run_migrations().await?;
            Arc::new(store)
        }
    };

    let policy = SharedPolicy::new(config.removal_policy());
    info!(
        allow_affiliation_remove = config.affiliations.allow_remove,
        allow_identity_remove = config.identities.allow_remove,
        "Affiliation service ready"
    );

    Ok((
        AffiliationService::new(store, Arc::new(policy.clone())),
        policy,
    ))
}
