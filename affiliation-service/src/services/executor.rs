//! Cascade execution - the only component that mutates during Remove/Modify.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument};

use super::error::AffiliationError;
use super::planner::{AffectedAffiliation, AffectedIdentity, CascadeKind, ImpactPlan};
use super::store::{AffiliationStore, StoreTransaction};
use crate::models::RevocationReason;

/// Outcome of a committed cascade, in planner order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CascadeResult {
    pub affiliations: Vec<AffectedAffiliation>,
    pub identities: Vec<AffectedIdentity>,
}

impl CascadeResult {
    /// Old names of every affected node.
    pub fn affiliation_names(&self) -> Vec<String> {
        self.affiliations.iter().map(|a| a.path.to_string()).collect()
    }

    pub fn identity_ids(&self) -> Vec<String> {
        self.identities.iter().map(|i| i.id.clone()).collect()
    }

    pub fn revoked_serials(&self) -> Vec<String> {
        self.identities
            .iter()
            .flat_map(|i| i.certificates.iter().cloned())
            .collect()
    }
}

impl From<ImpactPlan> for CascadeResult {
    fn from(plan: ImpactPlan) -> Self {
        Self {
            affiliations: plan.affiliations,
            identities: plan.identities,
        }
    }
}

#[derive(Clone)]
pub struct CascadeExecutor {
    store: Arc<dyn AffiliationStore>,
}

impl CascadeExecutor {
    pub fn new(store: Arc<dyn AffiliationStore>) -> Self {
        Self { store }
    }

    /// Apply `plan` in a single transaction. Nothing is written unless every
    /// step succeeds.
    #[instrument(skip(self, plan), fields(kind = plan.kind.as_str(), target = %plan.target))]
    pub async fn execute(&self, plan: ImpactPlan) -> Result<CascadeResult, AffiliationError> {
        let mut tx = self.store.begin().await?;

        let applied = match &plan.kind {
            CascadeKind::Remove => Self::apply_removal(tx.as_mut(), &plan).await,
            CascadeKind::Modify { .. } => Self::apply_rename(tx.as_mut(), &plan).await,
        };
        if let Err(e) = applied {
            error!(error = %e, "Cascade step failed, rolling back");
            return Err(e);
        }

        tx.commit().await.map_err(|e| {
            error!(error = %e, "Cascade commit failed");
            AffiliationError::Store(e)
        })?;

        info!(
            affiliations = plan.affiliations.len(),
            identities = plan.identities.len(),
            certificates = plan.certificate_count(),
            "Cascade committed"
        );

        Ok(plan.into())
    }

    async fn apply_removal(
        tx: &mut dyn StoreTransaction,
        plan: &ImpactPlan,
    ) -> Result<(), AffiliationError> {
        for identity in &plan.identities {
            for serial in &identity.certificates {
                tx.revoke_certificate(serial, RevocationReason::AffiliationChanged)
                    .await?;
            }
            tx.delete_identity(&identity.id).await?;
        }
        for affiliation in &plan.affiliations {
            tx.delete_affiliation(&affiliation.path).await?;
        }
        Ok(())
    }

    async fn apply_rename(
        tx: &mut dyn StoreTransaction,
        plan: &ImpactPlan,
    ) -> Result<(), AffiliationError> {
        for identity in &plan.identities {
            if let Some(new_affiliation) = &identity.new_affiliation {
                tx.update_identity_affiliation(&identity.id, new_affiliation)
                    .await?;
            }
            for serial in &identity.certificates {
                tx.revoke_certificate(serial, RevocationReason::AffiliationChanged)
                    .await?;
            }
        }
        for affiliation in &plan.affiliations {
            tx.delete_affiliation(&affiliation.path).await?;
        }
        for path in plan.created_paths() {
            tx.create_affiliation(&path).await?;
        }
        Ok(())
    }
}
