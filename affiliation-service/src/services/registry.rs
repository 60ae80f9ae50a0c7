//! Affiliation registry - single-node primitives over the hierarchy.

use std::sync::Arc;
use tracing::{info, instrument};

use super::error::AffiliationError;
use super::store::{AffiliationStore, StoreError};
use crate::models::{AffiliationNode, AffiliationPath};

#[derive(Clone)]
pub struct AffiliationRegistry {
    store: Arc<dyn AffiliationStore>,
}

impl AffiliationRegistry {
    pub fn new(store: Arc<dyn AffiliationStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, path: &AffiliationPath) -> Result<AffiliationNode, AffiliationError> {
        self.store
            .get_affiliation(path)
            .await?
            .ok_or_else(|| AffiliationError::NotFound(path.clone()))
    }

    /// `filter` and all of its descendants. A non-root filter must exist.
    pub async fn get_all(
        &self,
        filter: &AffiliationPath,
    ) -> Result<Vec<AffiliationNode>, AffiliationError> {
        let nodes = self.store.get_affiliations(filter).await?;
        if !filter.is_root() && !nodes.iter().any(|node| node.path == *filter) {
            return Err(AffiliationError::NotFound(filter.clone()));
        }
        Ok(nodes)
    }

    /// The root always exists.
    pub async fn exists(&self, path: &AffiliationPath) -> Result<bool, AffiliationError> {
        if path.is_root() {
            return Ok(true);
        }
        Ok(self.store.get_affiliation(path).await?.is_some())
    }

    /// Nodes an Add of `path` would create, shallowest first.
    ///
    /// Without `force` this is just `path`, and its parent must exist. With
    /// `force` every missing ancestor precedes it.
    pub async fn creation_chain(
        &self,
        path: &AffiliationPath,
        force: bool,
    ) -> Result<Vec<AffiliationPath>, AffiliationError> {
        if path.is_root() {
            return Err(AffiliationError::InvalidFormat(
                "The root affiliation cannot be added".to_string(),
            ));
        }
        if self.exists(path).await? {
            return Err(AffiliationError::AlreadyExists(path.clone()));
        }

        if !force {
            if let Some(parent) = path.parent() {
                if !self.exists(&parent).await? {
                    return Err(AffiliationError::ParentMissing {
                        path: path.clone(),
                        parent,
                    });
                }
            }
            return Ok(vec![path.clone()]);
        }

        let mut chain = Vec::new();
        for ancestor in path.ancestors() {
            if !self.exists(&ancestor).await? {
                chain.push(ancestor);
            }
        }
        chain.push(path.clone());
        Ok(chain)
    }

    /// Create every node of `chain` in one transaction.
    #[instrument(skip(self, chain), fields(nodes = chain.len()))]
    pub async fn create_chain(&self, chain: &[AffiliationPath]) -> Result<(), AffiliationError> {
        let mut tx = self.store.begin().await?;
        for path in chain {
            tx.create_affiliation(path)
                .await
                .map_err(|e| conflict_as_exists(e, path))?;
        }
        tx.commit().await.map_err(|e| match chain.last() {
            Some(target) => conflict_as_exists(e, target),
            None => AffiliationError::Store(e),
        })?;

        for path in chain {
            info!(affiliation = %path, "Affiliation created");
        }
        Ok(())
    }

    /// Create `path`, and its missing ancestors when `force` is set.
    pub async fn create(
        &self,
        path: &AffiliationPath,
        force: bool,
    ) -> Result<AffiliationNode, AffiliationError> {
        let chain = self.creation_chain(path, force).await?;
        self.create_chain(&chain).await?;
        self.get(path).await
    }

    /// Remove exactly one node. Never cascades.
    #[instrument(skip(self), fields(affiliation = %path))]
    pub async fn delete(&self, path: &AffiliationPath) -> Result<(), AffiliationError> {
        let mut tx = self.store.begin().await?;
        tx.delete_affiliation(path).await.map_err(|e| match e {
            StoreError::Missing(_) => AffiliationError::NotFound(path.clone()),
            other => AffiliationError::Store(other),
        })?;
        tx.commit().await?;
        info!("Affiliation deleted");
        Ok(())
    }
}

fn conflict_as_exists(err: StoreError, path: &AffiliationPath) -> AffiliationError {
    match err {
        StoreError::Conflict(_) => AffiliationError::AlreadyExists(path.clone()),
        other => AffiliationError::Store(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::MemoryStore;

    fn path(s: &str) -> AffiliationPath {
        AffiliationPath::parse(s).unwrap()
    }

    fn registry() -> (MemoryStore, AffiliationRegistry) {
        let store = MemoryStore::new();
        for p in ["org1", "org1.department1", "org2"] {
            store.insert_affiliation(path(p)).unwrap();
        }
        let registry = AffiliationRegistry::new(Arc::new(store.clone()));
        (store, registry)
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let (_, registry) = registry();
        let node = registry.create(&path("org3"), false).await.unwrap();
        assert_eq!(node.name(), "org3");
        assert_eq!(registry.get(&path("org3")).await.unwrap().path, path("org3"));

        let err = registry.create(&path("org3"), false).await.unwrap_err();
        assert!(matches!(err, AffiliationError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_parent_missing_without_force() {
        let (_, registry) = registry();
        let err = registry
            .create(&path("org4.dept1.team2"), false)
            .await
            .unwrap_err();
        match err {
            AffiliationError::ParentMissing { parent, .. } => assert_eq!(parent, path("org4.dept1")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.exists(&path("org4")).await.unwrap());
    }

    #[tokio::test]
    async fn test_force_creates_missing_ancestors() {
        let (_, registry) = registry();
        let chain = registry
            .creation_chain(&path("org1.department1.team1.sub"), true)
            .await
            .unwrap();
        assert_eq!(
            chain,
            vec![path("org1.department1.team1"), path("org1.department1.team1.sub")]
        );

        registry.create(&path("org4.dept1.team2"), true).await.unwrap();
        for p in ["org4", "org4.dept1", "org4.dept1.team2"] {
            assert!(registry.exists(&path(p)).await.unwrap(), "{p} missing");
        }
    }

    #[tokio::test]
    async fn test_root_cannot_be_added() {
        let (_, registry) = registry();
        let err = registry.create(&AffiliationPath::root(), true).await.unwrap_err();
        assert_eq!(err.code(), "invalid_format");
    }

    #[tokio::test]
    async fn test_get_all_requires_existing_filter() {
        let (_, registry) = registry();
        assert_eq!(registry.get_all(&AffiliationPath::root()).await.unwrap().len(), 3);
        assert_eq!(registry.get_all(&path("org1")).await.unwrap().len(), 2);

        let err = registry.get_all(&path("org9")).await.unwrap_err();
        assert!(matches!(err, AffiliationError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_exactly_one_node() {
        let (_, registry) = registry();
        registry.delete(&path("org1")).await.unwrap();

        assert!(!registry.exists(&path("org1")).await.unwrap());
        assert!(registry.exists(&path("org1.department1")).await.unwrap());

        let err = registry.delete(&path("org1")).await.unwrap_err();
        assert!(matches!(err, AffiliationError::NotFound(_)));
    }
}
