//! Affiliation service - Get, GetAll, Add, Remove and Modify.
//!
//! Every mutating request follows the same path: request gate, policy checks,
//! subtree lock, plan, impact gate, commit. Plans are computed under the lock,
//! so the executor applies exactly what was authorized.

use std::sync::Arc;
use tracing::{info, instrument};

use super::authz::{AuthorizationEngine, Denial, Operation};
use super::error::AffiliationError;
use super::executor::{CascadeExecutor, CascadeResult};
use super::locks::SubtreeLocks;
use super::metrics::{
    CASCADE_IDENTITIES_TOTAL, CERTIFICATES_REVOKED_TOTAL, ERRORS_TOTAL, OPERATIONS_TOTAL,
    OPERATION_DURATION,
};
use super::planner::CascadePlanner;
use super::policy::PolicySource;
use super::registry::AffiliationRegistry;
use super::store::AffiliationStore;
use crate::models::{AffiliationNode, AffiliationPath, AffiliationTree, CallerAffiliation};

#[derive(Clone)]
pub struct AffiliationService {
    store: Arc<dyn AffiliationStore>,
    policy: Arc<dyn PolicySource>,
    locks: SubtreeLocks,
    registry: AffiliationRegistry,
    planner: CascadePlanner,
    executor: CascadeExecutor,
}

impl AffiliationService {
    pub fn new(store: Arc<dyn AffiliationStore>, policy: Arc<dyn PolicySource>) -> Self {
        Self {
            registry: AffiliationRegistry::new(store.clone()),
            planner: CascadePlanner::new(store.clone()),
            executor: CascadeExecutor::new(store.clone()),
            locks: SubtreeLocks::new(),
            store,
            policy,
        }
    }

    pub fn registry(&self) -> &AffiliationRegistry {
        &self.registry
    }

    pub async fn health_check(&self) -> Result<(), AffiliationError> {
        self.store.health_check().await?;
        Ok(())
    }

    /// Authorization context for an already-authenticated identity.
    #[instrument(skip(self))]
    pub async fn caller_context(
        &self,
        identity_id: &str,
    ) -> Result<CallerAffiliation, AffiliationError> {
        let identity = self.store.get_identity(identity_id).await?.ok_or_else(|| {
            AffiliationError::AuthorizationFailure(Denial::UnknownCaller {
                caller: identity_id.to_string(),
            })
        })?;
        Ok(CallerAffiliation::from_identity(&identity))
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    #[instrument(
        skip(self, path, caller),
        fields(service = "affiliation-service", method = "GetAffiliation", caller = %caller.id, affiliation = %path)
    )]
    pub async fn get_affiliation(
        &self,
        path: &AffiliationPath,
        caller: &CallerAffiliation,
    ) -> Result<AffiliationNode, AffiliationError> {
        let _timer = OPERATION_DURATION.with_label_values(&["get"]).start_timer();
        let result: Result<AffiliationNode, AffiliationError> = async {
            AuthorizationEngine::authorize_request(caller, Operation::Get, path)?;
            self.registry.get(path).await
        }
        .await;
        record("get", &result);
        result
    }

    /// `filter` and its descendants. A root filter from a non-root caller is
    /// narrowed to the caller's own affiliation.
    #[instrument(
        skip(self, filter, caller),
        fields(service = "affiliation-service", method = "GetAllAffiliations", caller = %caller.id, filter = %filter)
    )]
    pub async fn get_all_affiliations(
        &self,
        filter: &AffiliationPath,
        caller: &CallerAffiliation,
    ) -> Result<Vec<AffiliationNode>, AffiliationError> {
        let _timer = OPERATION_DURATION
            .with_label_values(&["get_all"])
            .start_timer();
        let result = self.collect_visible(filter, caller).await.map(|(_, nodes)| nodes);
        record("get_all", &result);
        result
    }

    /// Nested view of the same nodes [`Self::get_all_affiliations`] returns.
    ///
    /// The tree is rooted at the effective filter; for the root filter the
    /// top node has an empty name and the top-level affiliations as children.
    #[instrument(
        skip(self, filter, caller),
        fields(service = "affiliation-service", method = "GetAffiliationTree", caller = %caller.id, filter = %filter)
    )]
    pub async fn get_affiliation_tree(
        &self,
        filter: &AffiliationPath,
        caller: &CallerAffiliation,
    ) -> Result<AffiliationTree, AffiliationError> {
        let _timer = OPERATION_DURATION
            .with_label_values(&["get_all"])
            .start_timer();
        let result: Result<AffiliationTree, AffiliationError> = async {
            let (effective, nodes) = self.collect_visible(filter, caller).await?;
            let mut trees = AffiliationTree::build(&nodes);
            if effective.is_root() {
                return Ok(AffiliationTree {
                    name: String::new(),
                    affiliations: trees,
                });
            }
            match trees.iter().position(|tree| tree.name == effective.to_string()) {
                Some(index) => Ok(trees.swap_remove(index)),
                None => Err(AffiliationError::NotFound(effective)),
            }
        }
        .await;
        record("get_all", &result);
        result
    }

    async fn collect_visible(
        &self,
        filter: &AffiliationPath,
        caller: &CallerAffiliation,
    ) -> Result<(AffiliationPath, Vec<AffiliationNode>), AffiliationError> {
        let effective = if filter.is_root() {
            caller.affiliation.clone()
        } else {
            filter.clone()
        };
        AuthorizationEngine::authorize_request(caller, Operation::Get, &effective)?;
        let nodes = self.registry.get_all(&effective).await?;
        Ok((effective, nodes))
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Add `path`. With `force`, missing ancestors are created first.
    #[instrument(
        skip(self, path, caller),
        fields(service = "affiliation-service", method = "AddAffiliation", caller = %caller.id, affiliation = %path)
    )]
    pub async fn add_affiliation(
        &self,
        path: &AffiliationPath,
        force: bool,
        caller: &CallerAffiliation,
    ) -> Result<AffiliationNode, AffiliationError> {
        let _timer = OPERATION_DURATION.with_label_values(&["add"]).start_timer();
        let result = self.add_inner(path, force, caller).await;
        record("add", &result);
        result
    }

    async fn add_inner(
        &self,
        path: &AffiliationPath,
        force: bool,
        caller: &CallerAffiliation,
    ) -> Result<AffiliationNode, AffiliationError> {
        AuthorizationEngine::authorize_request(caller, Operation::Add, path)?;

        loop {
            let chain = self.registry.creation_chain(path, force).await?;
            let Some(anchor) = chain.first().cloned() else {
                return Err(AffiliationError::AlreadyExists(path.clone()));
            };

            let _guard = self.locks.acquire(vec![anchor.clone()]).await;

            // The hierarchy may have changed while waiting for the lock.
            let chain = self.registry.creation_chain(path, force).await?;
            let covered = chain
                .first()
                .map(|first| anchor.is_ancestor_or_equal(first))
                .unwrap_or(false);
            if !covered {
                continue;
            }

            self.registry.create_chain(&chain).await?;
            info!(created = chain.len(), "Affiliation added");
            return self.registry.get(path).await;
        }
    }

    /// Remove `path` and, with `force`, everything beneath it.
    #[instrument(
        skip(self, path, caller),
        fields(service = "affiliation-service", method = "RemoveAffiliation", caller = %caller.id, affiliation = %path)
    )]
    pub async fn remove_affiliation(
        &self,
        path: &AffiliationPath,
        force: bool,
        caller: &CallerAffiliation,
    ) -> Result<CascadeResult, AffiliationError> {
        let _timer = OPERATION_DURATION
            .with_label_values(&["remove"])
            .start_timer();
        let result = self.remove_inner(path, force, caller).await;
        record("remove", &result);
        if let Ok(cascade) = &result {
            record_cascade("remove", cascade);
        }
        result
    }

    async fn remove_inner(
        &self,
        path: &AffiliationPath,
        force: bool,
        caller: &CallerAffiliation,
    ) -> Result<CascadeResult, AffiliationError> {
        AuthorizationEngine::authorize_request(caller, Operation::Remove, path)?;

        let policy = self.policy.current();
        CascadePlanner::check_removal_allowed(&policy)?;

        let _guard = self.locks.acquire(vec![path.clone()]).await;

        let plan = self.planner.plan_removal(path).await?;
        CascadePlanner::check_removal(&plan, force, &policy)?;
        AuthorizationEngine::authorize(caller, Operation::Remove, path, plan.impacts_identities())?;

        let cascade = self.executor.execute(plan).await?;
        info!(
            affiliations = ?cascade.affiliation_names(),
            identities = ?cascade.identity_ids(),
            "Affiliation removed"
        );
        Ok(cascade)
    }

    /// Rename `path` to `new_path`, moving descendants and bound identities.
    #[instrument(
        skip(self, path, new_path, caller),
        fields(service = "affiliation-service", method = "ModifyAffiliation", caller = %caller.id, affiliation = %path, new_affiliation = %new_path)
    )]
    pub async fn modify_affiliation(
        &self,
        path: &AffiliationPath,
        new_path: &AffiliationPath,
        force: bool,
        caller: &CallerAffiliation,
    ) -> Result<CascadeResult, AffiliationError> {
        let _timer = OPERATION_DURATION
            .with_label_values(&["modify"])
            .start_timer();
        let result = self.modify_inner(path, new_path, force, caller).await;
        record("modify", &result);
        if let Ok(cascade) = &result {
            record_cascade("modify", cascade);
        }
        result
    }

    async fn modify_inner(
        &self,
        path: &AffiliationPath,
        new_path: &AffiliationPath,
        force: bool,
        caller: &CallerAffiliation,
    ) -> Result<CascadeResult, AffiliationError> {
        AuthorizationEngine::authorize_request(caller, Operation::Modify, path)?;
        AuthorizationEngine::authorize_request(caller, Operation::Modify, new_path)?;

        let _guard = self
            .locks
            .acquire(vec![path.clone(), new_path.clone()])
            .await;

        let plan = self.planner.plan_rename(path, new_path).await?;
        CascadePlanner::check_rename(&plan, force)?;
        AuthorizationEngine::authorize(caller, Operation::Modify, path, plan.impacts_identities())?;

        let cascade = self.executor.execute(plan).await?;
        info!(
            affiliations = ?cascade.affiliation_names(),
            identities = ?cascade.identity_ids(),
            "Affiliation modified"
        );
        Ok(cascade)
    }
}

fn record<T>(operation: &str, result: &Result<T, AffiliationError>) {
    match result {
        Ok(_) => OPERATIONS_TOTAL.with_label_values(&[operation, "ok"]).inc(),
        Err(e) => {
            OPERATIONS_TOTAL
                .with_label_values(&[operation, e.code()])
                .inc();
            ERRORS_TOTAL.with_label_values(&[e.code()]).inc();
        }
    }
}

fn record_cascade(operation: &str, cascade: &CascadeResult) {
    CASCADE_IDENTITIES_TOTAL
        .with_label_values(&[operation])
        .inc_by(cascade.identities.len() as f64);
    CERTIFICATES_REVOKED_TOTAL.inc_by(cascade.revoked_serials().len() as f64);
}
