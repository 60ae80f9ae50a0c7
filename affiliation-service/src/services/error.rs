use service_core::error::AppError;
use thiserror::Error;

use super::authz::Denial;
use super::store::StoreError;
use crate::models::{AffiliationPath, InvalidAffiliation};

#[derive(Error, Debug)]
pub enum AffiliationError {
    #[error("{0}")]
    InvalidFormat(String),

    #[error("Affiliation '{0}' not found")]
    NotFound(AffiliationPath),

    #[error("Affiliation '{0}' already exists")]
    AlreadyExists(AffiliationPath),

    #[error("Parent affiliation '{parent}' of '{path}' does not exist")]
    ParentMissing {
        path: AffiliationPath,
        parent: AffiliationPath,
    },

    #[error("Affiliation '{0}' has child affiliations; use force to remove them")]
    HasChildren(AffiliationPath),

    #[error("Affiliation '{path}' has {count} identities bound to it; use force to proceed")]
    HasIdentities { path: AffiliationPath, count: usize },

    #[error("Affiliation removal is disabled")]
    PolicyForbidsAffiliationRemoval,

    #[error("Identity removal is disabled; cannot remove identities bound to '{0}'")]
    PolicyForbidsIdentityRemoval(AffiliationPath),

    #[error("Authorization failure: {0}")]
    AuthorizationFailure(Denial),

    #[error("Store failure: {0}")]
    Store(#[from] StoreError),
}

impl AffiliationError {
    /// Stable identifier for the error cause.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidFormat(_) => "invalid_format",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::ParentMissing { .. } => "parent_missing",
            Self::HasChildren(_) => "has_children",
            Self::HasIdentities { .. } => "has_identities",
            Self::PolicyForbidsAffiliationRemoval => "policy_forbids_affiliation_removal",
            Self::PolicyForbidsIdentityRemoval(_) => "policy_forbids_identity_removal",
            Self::AuthorizationFailure(_) => "authorization_failure",
            Self::Store(_) => "store_failure",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

impl From<InvalidAffiliation> for AffiliationError {
    fn from(err: InvalidAffiliation) -> Self {
        AffiliationError::InvalidFormat(err.to_string())
    }
}

impl From<Denial> for AffiliationError {
    fn from(denial: Denial) -> Self {
        AffiliationError::AuthorizationFailure(denial)
    }
}

impl From<AffiliationError> for AppError {
    fn from(err: AffiliationError) -> Self {
        let message = err.to_string();
        match err {
            AffiliationError::InvalidFormat(_) | AffiliationError::ParentMissing { .. } => {
                AppError::BadRequest(anyhow::anyhow!(message))
            }
            AffiliationError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            AffiliationError::AlreadyExists(_)
            | AffiliationError::HasChildren(_)
            | AffiliationError::HasIdentities { .. } => AppError::Conflict(anyhow::anyhow!(message)),
            AffiliationError::PolicyForbidsAffiliationRemoval
            | AffiliationError::PolicyForbidsIdentityRemoval(_)
            | AffiliationError::AuthorizationFailure(_) => {
                AppError::Forbidden(anyhow::anyhow!(message))
            }
            AffiliationError::Store(e) => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}
