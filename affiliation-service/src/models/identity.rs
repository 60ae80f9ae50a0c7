//! Identity model - enrolled identities bound to an affiliation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::AffiliationPath;

/// Attribute granting the right to read and change the affiliation hierarchy.
pub const ATTR_AFFILIATION_MGR: &str = "hf.AffiliationMgr";

/// Attribute listing the identity types a registrar may register.
///
/// A non-empty value makes the identity a registrar.
pub const ATTR_REGISTRAR_ROLES: &str = "hf.Registrar.Roles";

/// Identity record owned by the identity store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub id: String,
    pub affiliation: AffiliationPath,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl IdentityRecord {
    /// Create a new identity with no attributes.
    pub fn new(id: impl Into<String>, affiliation: AffiliationPath) -> Self {
        Self {
            id: id.into(),
            affiliation,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}
