//! Cascade planning.
//!
//! The planner only reads. It snapshots everything a Remove or Modify would
//! touch (the node subtree, the identities bound anywhere in it and their
//! unrevoked certificates) so authorization and policy checks can run against
//! the full impact before the executor mutates anything.

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::error::AffiliationError;
use super::policy::RemovalPolicy;
use super::store::AffiliationStore;
use crate::models::{AffiliationNode, AffiliationPath, CertificateRecord, IdentityRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CascadeKind {
    Remove,
    Modify { new_target: AffiliationPath },
}

impl CascadeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remove => "remove",
            Self::Modify { .. } => "modify",
        }
    }
}

/// A node reached by the cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedAffiliation {
    pub path: AffiliationPath,
    /// Replacement path; `None` for a removal.
    pub new_path: Option<AffiliationPath>,
}

/// An identity bound to a node reached by the cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffectedIdentity {
    pub id: String,
    pub affiliation: AffiliationPath,
    /// Rewritten binding; `None` when the identity is deleted.
    pub new_affiliation: Option<AffiliationPath>,
    /// Serials of the identity's unrevoked certificates.
    pub certificates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactPlan {
    pub kind: CascadeKind,
    pub target: AffiliationPath,
    /// Target plus descendants, deepest first, ties broken by name.
    pub affiliations: Vec<AffectedAffiliation>,
    /// In registration order.
    pub identities: Vec<AffectedIdentity>,
}

impl ImpactPlan {
    /// Build a plan from the nodes and identities found under `target`.
    pub fn assemble(
        kind: CascadeKind,
        target: AffiliationPath,
        nodes: Vec<AffiliationNode>,
        identities: Vec<(IdentityRecord, Vec<CertificateRecord>)>,
    ) -> Self {
        let rename_to = match &kind {
            CascadeKind::Remove => None,
            CascadeKind::Modify { new_target } => Some(new_target.clone()),
        };

        let mut paths: Vec<AffiliationPath> = nodes.into_iter().map(|node| node.path).collect();
        paths.sort_by(|a, b| {
            b.depth()
                .cmp(&a.depth())
                .then_with(|| a.to_string().cmp(&b.to_string()))
        });

        let affiliations = paths
            .into_iter()
            .map(|path| AffectedAffiliation {
                new_path: rename_to
                    .as_ref()
                    .and_then(|to| path.rebase(&target, to)),
                path,
            })
            .collect();

        let identities = identities
            .into_iter()
            .map(|(identity, certificates)| AffectedIdentity {
                new_affiliation: rename_to
                    .as_ref()
                    .and_then(|to| identity.affiliation.rebase(&target, to)),
                certificates: certificates
                    .into_iter()
                    .filter(|cert| !cert.is_revoked())
                    .map(|cert| cert.serial)
                    .collect(),
                id: identity.id,
                affiliation: identity.affiliation,
            })
            .collect();

        Self {
            kind,
            target,
            affiliations,
            identities,
        }
    }

    pub fn impacts_identities(&self) -> bool {
        !self.identities.is_empty()
    }

    pub fn has_descendants(&self) -> bool {
        self.affiliations.iter().any(|a| a.path != self.target)
    }

    /// Number of certificates the cascade revokes.
    pub fn certificate_count(&self) -> usize {
        self.identities.iter().map(|i| i.certificates.len()).sum()
    }

    /// Renamed nodes in creation order, shallowest first.
    pub fn created_paths(&self) -> Vec<AffiliationPath> {
        self.affiliations
            .iter()
            .rev()
            .filter_map(|a| a.new_path.clone())
            .collect()
    }
}

#[derive(Clone)]
pub struct CascadePlanner {
    store: Arc<dyn AffiliationStore>,
}

impl CascadePlanner {
    pub fn new(store: Arc<dyn AffiliationStore>) -> Self {
        Self { store }
    }

    /// Plan the removal of `target` and everything beneath it.
    #[instrument(skip(self), fields(target = %target))]
    pub async fn plan_removal(
        &self,
        target: &AffiliationPath,
    ) -> Result<ImpactPlan, AffiliationError> {
        let nodes = self.collect_nodes(target).await?;
        let identities = self.collect_identities(target).await?;
        let plan = ImpactPlan::assemble(CascadeKind::Remove, target.clone(), nodes, identities);
        debug!(
            affiliations = plan.affiliations.len(),
            identities = plan.identities.len(),
            "Removal planned"
        );
        Ok(plan)
    }

    /// Plan renaming `target` to `new_target`, carrying descendants along.
    #[instrument(skip(self), fields(target = %target, new_target = %new_target))]
    pub async fn plan_rename(
        &self,
        target: &AffiliationPath,
        new_target: &AffiliationPath,
    ) -> Result<ImpactPlan, AffiliationError> {
        if new_target.is_root() {
            return Err(AffiliationError::InvalidFormat(
                "An affiliation cannot be renamed to the root".to_string(),
            ));
        }
        if target.is_ancestor_or_equal(new_target) {
            return Err(AffiliationError::InvalidFormat(format!(
                "Cannot rename affiliation '{}' to '{}' beneath itself",
                target, new_target
            )));
        }

        let nodes = self.collect_nodes(target).await?;

        if self.store.get_affiliation(new_target).await?.is_some() {
            return Err(AffiliationError::AlreadyExists(new_target.clone()));
        }
        if let Some(parent) = new_target.parent().filter(|p| !p.is_root()) {
            if self.store.get_affiliation(&parent).await?.is_none() {
                return Err(AffiliationError::ParentMissing {
                    path: new_target.clone(),
                    parent,
                });
            }
        }

        let identities = self.collect_identities(target).await?;
        let plan = ImpactPlan::assemble(
            CascadeKind::Modify {
                new_target: new_target.clone(),
            },
            target.clone(),
            nodes,
            identities,
        );
        debug!(
            affiliations = plan.affiliations.len(),
            identities = plan.identities.len(),
            "Rename planned"
        );
        Ok(plan)
    }

    /// Refuse removal outright when the policy disables it.
    pub fn check_removal_allowed(policy: &RemovalPolicy) -> Result<(), AffiliationError> {
        if !policy.allow_affiliation_remove {
            return Err(AffiliationError::PolicyForbidsAffiliationRemoval);
        }
        Ok(())
    }

    /// Force and policy checks for a planned removal.
    pub fn check_removal(
        plan: &ImpactPlan,
        force: bool,
        policy: &RemovalPolicy,
    ) -> Result<(), AffiliationError> {
        if plan.has_descendants() && !force {
            return Err(AffiliationError::HasChildren(plan.target.clone()));
        }
        if plan.impacts_identities() {
            if !force {
                return Err(AffiliationError::HasIdentities {
                    path: plan.target.clone(),
                    count: plan.identities.len(),
                });
            }
            if !policy.allow_identity_remove {
                return Err(AffiliationError::PolicyForbidsIdentityRemoval(
                    plan.target.clone(),
                ));
            }
        }
        Ok(())
    }

    /// Force checks for a planned rename.
    pub fn check_rename(plan: &ImpactPlan, force: bool) -> Result<(), AffiliationError> {
        if plan.impacts_identities() && !force {
            return Err(AffiliationError::HasIdentities {
                path: plan.target.clone(),
                count: plan.identities.len(),
            });
        }
        Ok(())
    }

    async fn collect_nodes(
        &self,
        target: &AffiliationPath,
    ) -> Result<Vec<AffiliationNode>, AffiliationError> {
        let nodes = self.store.get_affiliations(target).await?;
        if !nodes.iter().any(|node| node.path == *target) {
            return Err(AffiliationError::NotFound(target.clone()));
        }
        Ok(nodes)
    }

    async fn collect_identities(
        &self,
        target: &AffiliationPath,
    ) -> Result<Vec<(IdentityRecord, Vec<CertificateRecord>)>, AffiliationError> {
        let identities = self
            .store
            .find_identities_by_affiliation(target, true)
            .await?;

        let mut collected = Vec::with_capacity(identities.len());
        for identity in identities {
            let certificates = self
                .store
                .find_certificates_by_identity(&identity.id)
                .await?;
            collected.push((identity, certificates));
        }
        Ok(collected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RevocationReason;
    use crate::services::memory::MemoryStore;
    use chrono::Utc;

    fn path(s: &str) -> AffiliationPath {
        AffiliationPath::parse(s).unwrap()
    }

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for p in ["org1", "org2", "org2.dept1", "org2.dept1.team1", "org2.dept2"] {
            store.insert_affiliation(path(p)).unwrap();
        }
        store
            .insert_identity(IdentityRecord::new("user1", path("org2")))
            .unwrap();
        store
            .insert_identity(IdentityRecord::new("user2", path("org2.dept1.team1")))
            .unwrap();
        store
            .insert_identity(IdentityRecord::new("user3", path("org1")))
            .unwrap();

        store.insert_certificate(CertificateRecord::issue("user1")).unwrap();
        let mut revoked = CertificateRecord::issue("user1");
        revoked.revoke(RevocationReason::KeyCompromise, Utc::now());
        store.insert_certificate(revoked).unwrap();
        store
    }

    #[test]
    fn test_assemble_orders_deepest_first() {
        let nodes = ["org2", "org2.b", "org2.a", "org2.a.x"]
            .iter()
            .map(|p| AffiliationNode::new(path(p)))
            .collect();
        let plan = ImpactPlan::assemble(CascadeKind::Remove, path("org2"), nodes, Vec::new());

        let order: Vec<String> = plan.affiliations.iter().map(|a| a.path.to_string()).collect();
        assert_eq!(order, vec!["org2.a.x", "org2.a", "org2.b", "org2"]);
        assert!(plan.has_descendants());
        assert!(!plan.impacts_identities());
    }

    #[test]
    fn test_assemble_rebases_on_rename() {
        let nodes = vec![
            AffiliationNode::new(path("org2")),
            AffiliationNode::new(path("org2.dept1")),
        ];
        let identity = IdentityRecord::new("user2", path("org2.dept1"));
        let plan = ImpactPlan::assemble(
            CascadeKind::Modify {
                new_target: path("org3"),
            },
            path("org2"),
            nodes,
            vec![(identity, vec![CertificateRecord::issue("user2")])],
        );

        assert_eq!(plan.affiliations[0].new_path, Some(path("org3.dept1")));
        assert_eq!(plan.affiliations[1].new_path, Some(path("org3")));
        assert_eq!(plan.identities[0].new_affiliation, Some(path("org3.dept1")));
        assert_eq!(plan.created_paths(), vec![path("org3"), path("org3.dept1")]);
        assert_eq!(plan.certificate_count(), 1);
    }

    #[tokio::test]
    async fn test_plan_removal_collects_subtree() {
        let planner = CascadePlanner::new(Arc::new(seeded()));
        let plan = planner.plan_removal(&path("org2")).await.unwrap();

        assert_eq!(plan.affiliations.len(), 4);
        let ids: Vec<&str> = plan.identities.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["user1", "user2"]);
        // Already-revoked certificates are left alone.
        assert_eq!(plan.identities[0].certificates.len(), 1);
        assert!(plan.identities[1].certificates.is_empty());
    }

    #[tokio::test]
    async fn test_plan_removal_of_missing_node() {
        let planner = CascadePlanner::new(Arc::new(seeded()));
        let err = planner.plan_removal(&path("org9")).await.unwrap_err();
        assert!(matches!(err, AffiliationError::NotFound(_)));

        let err = planner.plan_removal(&AffiliationPath::root()).await.unwrap_err();
        assert!(matches!(err, AffiliationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_plan_rename_validates_new_target() {
        let planner = CascadePlanner::new(Arc::new(seeded()));

        let err = planner
            .plan_rename(&path("org2"), &path("org1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AffiliationError::AlreadyExists(_)));

        let err = planner
            .plan_rename(&path("org2"), &path("org2.dept3"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_format");

        let err = planner
            .plan_rename(&path("org2"), &path("org5.dept1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AffiliationError::ParentMissing { .. }));

        let plan = planner
            .plan_rename(&path("org2.dept2"), &path("org1.dept2"))
            .await
            .unwrap();
        assert_eq!(plan.affiliations[0].new_path, Some(path("org1.dept2")));
    }

    #[test]
    fn test_removal_checks() {
        let nodes = vec![
            AffiliationNode::new(path("org2")),
            AffiliationNode::new(path("org2.dept1")),
        ];
        let identity = IdentityRecord::new("user1", path("org2"));
        let plan = ImpactPlan::assemble(
            CascadeKind::Remove,
            path("org2"),
            nodes,
            vec![(identity, Vec::new())],
        );

        let permissive = RemovalPolicy::permissive();
        let no_identities = RemovalPolicy::new(true, false);

        assert_eq!(
            CascadePlanner::check_removal(&plan, false, &permissive).unwrap_err().code(),
            "has_children"
        );
        assert_eq!(
            CascadePlanner::check_removal(&plan, true, &no_identities)
                .unwrap_err()
                .code(),
            "policy_forbids_identity_removal"
        );
        assert!(CascadePlanner::check_removal(&plan, true, &permissive).is_ok());

        assert_eq!(
            CascadePlanner::check_removal_allowed(&RemovalPolicy::default())
                .unwrap_err()
                .code(),
            "policy_forbids_affiliation_removal"
        );
        assert_eq!(
            CascadePlanner::check_rename(&plan, false).unwrap_err().code(),
            "has_identities"
        );
        assert!(CascadePlanner::check_rename(&plan, true).is_ok());
    }
}
