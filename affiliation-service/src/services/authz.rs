//! Authorization decisions for affiliation operations.
//!
//! Authorization runs in two phases. The request gate (affiliation-manager
//! attribute plus scope) runs before any store access; the impact gate
//! (registrar capability) runs once a cascade plan shows identities would be
//! touched.

use std::fmt;
use thiserror::Error;

use crate::models::{AffiliationPath, CallerAffiliation};

/// Operations subject to authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Add,
    Remove,
    Modify,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Modify => "modify",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason a request was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    #[error("User does not have attribute 'hf.AffiliationMgr'")]
    MissingAffiliationMgr { caller: String },

    #[error(
        "Caller '{caller}' with affiliation '{caller_affiliation}' may not act on affiliation '{target}'"
    )]
    OutOfScope {
        caller: String,
        caller_affiliation: AffiliationPath,
        target: AffiliationPath,
    },

    #[error("Caller '{caller}' is not a registrar and the change affects identities")]
    NotRegistrar { caller: String },

    #[error("Caller '{caller}' is not a registered identity")]
    UnknownCaller { caller: String },
}

impl Denial {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAffiliationMgr { .. } => "missing_affiliation_mgr",
            Self::OutOfScope { .. } => "out_of_scope",
            Self::NotRegistrar { .. } => "not_registrar",
            Self::UnknownCaller { .. } => "unknown_caller",
        }
    }
}

/// Authorization engine. Stateless; every decision is a pure function of the
/// caller context and the request.
#[derive(Debug, Clone)]
pub struct AuthorizationEngine;

impl AuthorizationEngine {
    /// Request gate: the caller must hold `hf.AffiliationMgr` and the target
    /// must lie within the caller's own affiliation.
    pub fn authorize_request(
        caller: &CallerAffiliation,
        operation: Operation,
        target: &AffiliationPath,
    ) -> Result<(), Denial> {
        if !caller.is_affiliation_manager() {
            let denial = Denial::MissingAffiliationMgr {
                caller: caller.id.clone(),
            };
            Self::log_denial(caller, operation, target, &denial);
            return Err(denial);
        }

        if !caller.affiliation.is_ancestor_or_equal(target) {
            let denial = Denial::OutOfScope {
                caller: caller.id.clone(),
                caller_affiliation: caller.affiliation.clone(),
                target: target.clone(),
            };
            Self::log_denial(caller, operation, target, &denial);
            return Err(denial);
        }

        Ok(())
    }

    /// Impact gate: a change touching identities requires a registrar.
    pub fn authorize_impact(
        caller: &CallerAffiliation,
        operation: Operation,
        target: &AffiliationPath,
        impacts_identities: bool,
    ) -> Result<(), Denial> {
        if impacts_identities && !caller.is_registrar() {
            let denial = Denial::NotRegistrar {
                caller: caller.id.clone(),
            };
            Self::log_denial(caller, operation, target, &denial);
            return Err(denial);
        }
        Ok(())
    }

    /// Full decision once the plan's impact is known: request gate, then
    /// impact gate.
    pub fn authorize(
        caller: &CallerAffiliation,
        operation: Operation,
        target: &AffiliationPath,
        impacts_identities: bool,
    ) -> Result<(), Denial> {
        Self::authorize_request(caller, operation, target)?;
        Self::authorize_impact(caller, operation, target, impacts_identities)
    }

    fn log_denial(
        caller: &CallerAffiliation,
        operation: Operation,
        target: &AffiliationPath,
        denial: &Denial,
    ) {
        tracing::warn!(
            caller = %caller.id,
            caller_affiliation = %caller.affiliation,
            operation = %operation,
            target = %target,
            reason = denial.code(),
            "Permission denied: {}",
            denial
        );
    }
}
