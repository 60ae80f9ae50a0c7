//! In-process store.
//!
//! Transactions validate each step against a private snapshot, then on commit
//! replay their log against the live state under the write lock. The replayed
//! state is swapped in only if every step succeeds again, so readers never see
//! a half-applied unit of work and a commit that lost a race changes nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::store::{AffiliationStore, StoreError, StoreTransaction};
use crate::models::{
    AffiliationNode, AffiliationPath, CertificateRecord, IdentityRecord, RevocationReason,
};

#[derive(Debug, Clone, Default)]
struct StoreState {
    affiliations: BTreeMap<AffiliationPath, AffiliationNode>,
    identities: Vec<IdentityRecord>,
    certificates: Vec<CertificateRecord>,
}

#[derive(Debug, Clone)]
enum Mutation {
    CreateAffiliation {
        path: AffiliationPath,
        at: DateTime<Utc>,
    },
    DeleteAffiliation(AffiliationPath),
    UpdateIdentityAffiliation {
        id: String,
        affiliation: AffiliationPath,
    },
    DeleteIdentity(String),
    RevokeCertificate {
        serial: String,
        reason: RevocationReason,
        at: DateTime<Utc>,
    },
}

impl StoreState {
    fn apply(&mut self, mutation: &Mutation) -> Result<(), StoreError> {
        match mutation {
            Mutation::CreateAffiliation { path, at } => {
                if self.affiliations.contains_key(path) {
                    return Err(StoreError::Conflict(format!(
                        "affiliation '{}' already exists",
                        path
                    )));
                }
                self.affiliations.insert(
                    path.clone(),
                    AffiliationNode {
                        path: path.clone(),
                        created_utc: *at,
                    },
                );
            }
            Mutation::DeleteAffiliation(path) => {
                if self.affiliations.remove(path).is_none() {
                    return Err(StoreError::Missing(format!("affiliation '{}'", path)));
                }
            }
            Mutation::UpdateIdentityAffiliation { id, affiliation } => {
                let identity = self
                    .identities
                    .iter_mut()
                    .find(|identity| &identity.id == id)
                    .ok_or_else(|| StoreError::Missing(format!("identity '{}'", id)))?;
                identity.affiliation = affiliation.clone();
            }
            Mutation::DeleteIdentity(id) => {
                let index = self
                    .identities
                    .iter()
                    .position(|identity| &identity.id == id)
                    .ok_or_else(|| StoreError::Missing(format!("identity '{}'", id)))?;
                self.identities.remove(index);
            }
            Mutation::RevokeCertificate { serial, reason, at } => {
                let cert = self
                    .certificates
                    .iter_mut()
                    .find(|cert| &cert.serial == serial)
                    .ok_or_else(|| StoreError::Missing(format!("certificate '{}'", serial)))?;
                // Keep the first revocation reason.
                if !cert.is_revoked() {
                    cert.revoke(*reason, *at);
                }
            }
        }
        Ok(())
    }
}

/// In-memory affiliation, identity and certificate tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState>, StoreError> {
        self.state
            .read()
            .map_err(|e| StoreError::Unavailable(format!("Memory store lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState>, StoreError> {
        self.state
            .write()
            .map_err(|e| StoreError::Unavailable(format!("Memory store lock poisoned: {}", e)))
    }

    /// Seed an affiliation without hierarchy checks.
    pub fn insert_affiliation(&self, path: AffiliationPath) -> Result<(), StoreError> {
        self.write()?.apply(&Mutation::CreateAffiliation {
            path,
            at: Utc::now(),
        })
    }

    /// Register an identity.
    pub fn insert_identity(&self, identity: IdentityRecord) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.identities.iter().any(|i| i.id == identity.id) {
            return Err(StoreError::Conflict(format!(
                "identity '{}' already exists",
                identity.id
            )));
        }
        state.identities.push(identity);
        Ok(())
    }

    /// Record an issued certificate.
    pub fn insert_certificate(&self, certificate: CertificateRecord) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state
            .certificates
            .iter()
            .any(|c| c.serial == certificate.serial)
        {
            return Err(StoreError::Conflict(format!(
                "certificate '{}' already exists",
                certificate.serial
            )));
        }
        state.certificates.push(certificate);
        Ok(())
    }
}

#[async_trait]
impl AffiliationStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }

    async fn get_affiliation(
        &self,
        path: &AffiliationPath,
    ) -> Result<Option<AffiliationNode>, StoreError> {
        Ok(self.read()?.affiliations.get(path).cloned())
    }

    async fn get_affiliations(
        &self,
        filter: &AffiliationPath,
    ) -> Result<Vec<AffiliationNode>, StoreError> {
        Ok(self
            .read()?
            .affiliations
            .values()
            .filter(|node| filter.is_ancestor_or_equal(&node.path))
            .cloned()
            .collect())
    }

    async fn get_identity(&self, id: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self
            .read()?
            .identities
            .iter()
            .find(|identity| identity.id == id)
            .cloned())
    }

    async fn find_identities_by_affiliation(
        &self,
        path: &AffiliationPath,
        include_descendants: bool,
    ) -> Result<Vec<IdentityRecord>, StoreError> {
        Ok(self
            .read()?
            .identities
            .iter()
            .filter(|identity| {
                identity.affiliation == *path
                    || (include_descendants && path.is_ancestor_or_equal(&identity.affiliation))
            })
            .cloned()
            .collect())
    }

    async fn find_certificates_by_identity(
        &self,
        identity_id: &str,
    ) -> Result<Vec<CertificateRecord>, StoreError> {
        Ok(self
            .read()?
            .certificates
            .iter()
            .filter(|cert| cert.identity_id == identity_id)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let snapshot = self.read()?.clone();
        Ok(Box::new(MemoryTransaction {
            live: Arc::clone(&self.state),
            working: snapshot,
            log: Vec::new(),
        }))
    }
}

struct MemoryTransaction {
    live: Arc<RwLock<StoreState>>,
    working: StoreState,
    log: Vec<Mutation>,
}

impl MemoryTransaction {
    fn record(&mut self, mutation: Mutation) -> Result<(), StoreError> {
        self.working.apply(&mutation)?;
        self.log.push(mutation);
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn create_affiliation(&mut self, path: &AffiliationPath) -> Result<(), StoreError> {
        self.record(Mutation::CreateAffiliation {
            path: path.clone(),
            at: Utc::now(),
        })
    }

    async fn delete_affiliation(&mut self, path: &AffiliationPath) -> Result<(), StoreError> {
        self.record(Mutation::DeleteAffiliation(path.clone()))
    }

    async fn update_identity_affiliation(
        &mut self,
        id: &str,
        affiliation: &AffiliationPath,
    ) -> Result<(), StoreError> {
        self.record(Mutation::UpdateIdentityAffiliation {
            id: id.to_string(),
            affiliation: affiliation.clone(),
        })
    }

    async fn delete_identity(&mut self, id: &str) -> Result<(), StoreError> {
        self.record(Mutation::DeleteIdentity(id.to_string()))
    }

    async fn revoke_certificate(
        &mut self,
        serial: &str,
        reason: RevocationReason,
    ) -> Result<(), StoreError> {
        self.record(Mutation::RevokeCertificate {
            serial: serial.to_string(),
            reason,
            at: Utc::now(),
        })
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut live = self
            .live
            .write()
            .map_err(|e| StoreError::Unavailable(format!("Memory store lock poisoned: {}", e)))?;

        let mut next = live.clone();
        for mutation in &self.log {
            next.apply(mutation)?;
        }
        *live = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> AffiliationPath {
        AffiliationPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_commit_applies_every_step() {
        let store = MemoryStore::new();
        store.insert_affiliation(path("org1")).unwrap();
        store
            .insert_identity(IdentityRecord::new("user1", path("org1")))
            .unwrap();
        let cert = CertificateRecord::issue("user1");
        let serial = cert.serial.clone();
        store.insert_certificate(cert).unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.create_affiliation(&path("org1.dept1")).await.unwrap();
        tx.update_identity_affiliation("user1", &path("org1.dept1"))
            .await
            .unwrap();
        tx.revoke_certificate(&serial, RevocationReason::AffiliationChanged)
            .await
            .unwrap();

        // Nothing is visible before commit.
        assert!(store
            .get_affiliation(&path("org1.dept1"))
            .await
            .unwrap()
            .is_none());

        tx.commit().await.unwrap();

        assert!(store
            .get_affiliation(&path("org1.dept1"))
            .await
            .unwrap()
            .is_some());
        let identity = store.get_identity("user1").await.unwrap().unwrap();
        assert_eq!(identity.affiliation, path("org1.dept1"));
        let certs = store.find_certificates_by_identity("user1").await.unwrap();
        assert!(certs[0].is_revoked());
        assert_eq!(certs[0].reason, Some(RevocationReason::AffiliationChanged));
    }

    #[tokio::test]
    async fn test_failed_step_leaves_state_untouched() {
        let store = MemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.create_affiliation(&path("org3")).await.unwrap();
        let err = tx.delete_affiliation(&path("missing")).await.unwrap_err();
        assert!(matches!(err, StoreError::Missing(_)));
        drop(tx);

        assert!(store.get_affiliation(&path("org3")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_losing_commit_changes_nothing() {
        let store = MemoryStore::new();

        let mut first = store.begin().await.unwrap();
        first.create_affiliation(&path("org4")).await.unwrap();

        let mut second = store.begin().await.unwrap();
        second.create_affiliation(&path("org5")).await.unwrap();
        second.create_affiliation(&path("org4")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        assert!(store.get_affiliation(&path("org4")).await.unwrap().is_some());
        assert!(store.get_affiliation(&path("org5")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_descendant_queries() {
        let store = MemoryStore::new();
        for p in ["org1", "org1.department1", "org2", "org2.dept1", "org20"] {
            store.insert_affiliation(path(p)).unwrap();
        }
        store
            .insert_identity(IdentityRecord::new("a", path("org2")))
            .unwrap();
        store
            .insert_identity(IdentityRecord::new("b", path("org2.dept1")))
            .unwrap();
        store
            .insert_identity(IdentityRecord::new("c", path("org20")))
            .unwrap();

        let names: Vec<String> = store
            .get_affiliations(&path("org2"))
            .await
            .unwrap()
            .iter()
            .map(|n| n.name())
            .collect();
        assert_eq!(names, vec!["org2", "org2.dept1"]);
        assert_eq!(
            store
                .get_affiliations(&AffiliationPath::root())
                .await
                .unwrap()
                .len(),
            5
        );

        let direct = store
            .find_identities_by_affiliation(&path("org2"), false)
            .await
            .unwrap();
        assert_eq!(direct.len(), 1);

        let subtree: Vec<String> = store
            .find_identities_by_affiliation(&path("org2"), true)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(subtree, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_identity_attribute_lookup() {
        let store = MemoryStore::new();
        store
            .insert_identity(
                IdentityRecord::new("admin", AffiliationPath::root())
                    .with_attribute("hf.AffiliationMgr", "true"),
            )
            .unwrap();

        assert_eq!(
            store
                .get_identity_attribute("admin", "hf.AffiliationMgr")
                .await
                .unwrap()
                .as_deref(),
            Some("true")
        );
        assert!(store
            .get_identity_attribute("admin", "hf.Revoker")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_identity_attribute("nobody", "hf.AffiliationMgr")
            .await
            .unwrap()
            .is_none());
    }
}
