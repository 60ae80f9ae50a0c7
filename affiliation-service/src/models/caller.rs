//! Caller model - the authenticated identity making a request.

use std::collections::BTreeMap;

use super::{AffiliationPath, IdentityRecord, ATTR_AFFILIATION_MGR, ATTR_REGISTRAR_ROLES};

/// Authorization context for the caller.
///
/// Built from the caller's identity record after the transport layer has
/// authenticated it. Only used for authorization decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerAffiliation {
    pub id: String,
    pub affiliation: AffiliationPath,
    pub attributes: BTreeMap<String, String>,
}

impl CallerAffiliation {
    pub fn new(
        id: impl Into<String>,
        affiliation: AffiliationPath,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            affiliation,
            attributes,
        }
    }

    pub fn from_identity(identity: &IdentityRecord) -> Self {
        Self::new(
            identity.id.clone(),
            identity.affiliation.clone(),
            identity.attributes.clone(),
        )
    }

    /// Holds `hf.AffiliationMgr=true`.
    pub fn is_affiliation_manager(&self) -> bool {
        self.attributes
            .get(ATTR_AFFILIATION_MGR)
            .map(|v| v.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Holds a non-empty `hf.Registrar.Roles`.
    pub fn is_registrar(&self) -> bool {
        self.attributes
            .get(ATTR_REGISTRAR_ROLES)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false)
    }
}
