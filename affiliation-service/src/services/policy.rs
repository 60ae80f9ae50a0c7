//! Removal policy switches.
//!
//! Read once per request through a [`PolicySource`], so toggling a switch
//! affects the next request without a restart.

use serde::Deserialize;
use std::sync::{Arc, RwLock};

/// Server-wide switches governing destructive cascades.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RemovalPolicy {
    /// `AllowAffiliationRemove`: Remove is refused outright when false.
    #[serde(default)]
    pub allow_affiliation_remove: bool,
    /// `AllowIdentityRemove`: a Remove that would delete identities is refused
    /// when false.
    #[serde(default)]
    pub allow_identity_remove: bool,
}

impl RemovalPolicy {
    pub fn new(allow_affiliation_remove: bool, allow_identity_remove: bool) -> Self {
        Self {
            allow_affiliation_remove,
            allow_identity_remove,
        }
    }

    /// Both switches on.
    pub fn permissive() -> Self {
        Self::new(true, true)
    }
}

pub trait PolicySource: Send + Sync {
    /// Policy in force for the request being handled.
    fn current(&self) -> RemovalPolicy;
}

impl PolicySource for RemovalPolicy {
    fn current(&self) -> RemovalPolicy {
        *self
    }
}

/// Runtime-toggleable policy shared between the service and its operators.
#[derive(Debug, Clone, Default)]
pub struct SharedPolicy {
    inner: Arc<RwLock<RemovalPolicy>>,
}

impl SharedPolicy {
    pub fn new(policy: RemovalPolicy) -> Self {
        Self {
            inner: Arc::new(RwLock::new(policy)),
        }
    }

    pub fn set(&self, policy: RemovalPolicy) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = policy;
    }

    pub fn set_allow_affiliation_remove(&self, allow: bool) {
        let mut policy = self.current();
        policy.allow_affiliation_remove = allow;
        self.set(policy);
    }

    pub fn set_allow_identity_remove(&self, allow: bool) {
        let mut policy = self.current();
        policy.allow_identity_remove = allow;
        self.set(policy);
    }
}

impl PolicySource for SharedPolicy {
    fn current(&self) -> RemovalPolicy {
        *self
            .inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
