//! Storage seam shared by the affiliation, identity and certificate tables.
//!
//! All three live under one transactional authority. Reads go straight to the
//! store; every mutation goes through a [`StoreTransaction`] that is applied
//! all-or-nothing on [`StoreTransaction::commit`]. Dropping a transaction
//! without committing discards it.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    AffiliationNode, AffiliationPath, CertificateRecord, IdentityRecord, RevocationReason,
};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Missing record: {0}")]
    Missing(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AffiliationStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    // ==================== Affiliation Operations ====================

    async fn get_affiliation(
        &self,
        path: &AffiliationPath,
    ) -> Result<Option<AffiliationNode>, StoreError>;

    /// `filter` itself plus every descendant, in path order. The root filter
    /// returns every node.
    async fn get_affiliations(
        &self,
        filter: &AffiliationPath,
    ) -> Result<Vec<AffiliationNode>, StoreError>;

    // ==================== Identity Operations ====================

    async fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError>;

    /// Identities bound to `path` (and its descendants when
    /// `include_descendants`), in registration order.
    async fn find_identities_by_affiliation(
        &self,
        path: &AffiliationPath,
        include_descendants: bool,
    ) -> Result<Vec<IdentityRecord>, StoreError>;

    async fn get_identity_attribute(
        &self,
        id: &str,
        name: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .get_identity(id)
            .await?
            .and_then(|identity| identity.attribute(name).map(str::to_string)))
    }

    // ==================== Certificate Operations ====================

    /// Certificates issued to an identity, in issuance order.
    async fn find_certificates_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<CertificateRecord>, StoreError>;

    // ==================== Transactions ====================

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// A unit of work spanning all three tables.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Fails with [`StoreError::Conflict`] if the node already exists.
    async fn create_affiliation(&mut self, path: &AffiliationPath) -> Result<(), StoreError>;

    /// Fails with [`StoreError::Missing`] if the node does not exist.
    async fn delete_affiliation(&mut self, path: &AffiliationPath) -> Result<(), StoreError>;

    async fn update_identity_affiliation(
        &mut self,
        id: &str,
        affiliation: &AffiliationPath,
    ) -> Result<(), StoreError>;

    async fn delete_identity(&mut self, id: &str) -> Result<(), StoreError>;

    async fn revoke_certificate(
        &mut self,
        serial: &str,
        reason: RevocationReason,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
