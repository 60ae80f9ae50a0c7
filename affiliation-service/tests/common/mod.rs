//! Common test utilities for affiliation-service integration tests.
//!
//! Every test gets its own in-memory store seeded with the bootstrap
//! hierarchy and identities below.

#![allow(dead_code)]

use affiliation_service::models::{
    AffiliationPath, CallerAffiliation, CertificateRecord, IdentityRecord, ATTR_AFFILIATION_MGR,
    ATTR_REGISTRAR_ROLES,
};
use affiliation_service::services::{
    AffiliationService, AffiliationStore, MemoryStore, RemovalPolicy, SharedPolicy,
};
use std::sync::{Arc, Once};

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,affiliation_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const REGISTRAR_ROLES: &str = "client,user,peer,validator,auditor";

/// Bootstrap affiliations, parents first.
pub const BOOTSTRAP_AFFILIATIONS: &[&str] = &[
    "org1",
    "org1.department1",
    "org1.department2",
    "org2",
    "org2.dept1",
];

pub fn path(s: &str) -> AffiliationPath {
    AffiliationPath::parse(s).expect("valid affiliation")
}

pub struct TestApp {
    pub store: MemoryStore,
    pub policy: SharedPolicy,
    pub service: AffiliationService,
}

impl TestApp {
    /// Bootstrap hierarchy with `admin` (root) and `admin2` (org2), both
    /// affiliation managers and registrars. Removal is disabled.
    pub fn spawn() -> Self {
        Self::bootstrap("org2")
    }

    /// Bootstrap hierarchy with `admin2` bound to `admin2_affiliation`, which
    /// is created if it is not part of the hierarchy.
    pub fn bootstrap(admin2_affiliation: &str) -> Self {
        let app = Self::empty();
        for affiliation in BOOTSTRAP_AFFILIATIONS {
            app.store
                .insert_affiliation(path(affiliation))
                .expect("seed affiliation");
        }
        if !BOOTSTRAP_AFFILIATIONS.contains(&admin2_affiliation) {
            app.store
                .insert_affiliation(path(admin2_affiliation))
                .expect("seed affiliation");
        }

        app.register(
            "admin",
            "",
            &[
                (ATTR_AFFILIATION_MGR, "true"),
                (ATTR_REGISTRAR_ROLES, REGISTRAR_ROLES),
                ("hf.Revoker", "true"),
                ("hf.GenCRL", "true"),
            ],
        );
        app.register(
            "admin2",
            admin2_affiliation,
            &[
                (ATTR_AFFILIATION_MGR, "true"),
                (ATTR_REGISTRAR_ROLES, REGISTRAR_ROLES),
            ],
        );
        app
    }

    pub fn empty() -> Self {
        init_tracing();
        let store = MemoryStore::new();
        let policy = SharedPolicy::new(RemovalPolicy::default());
        let service = AffiliationService::new(Arc::new(store.clone()), Arc::new(policy.clone()));
        Self {
            store,
            policy,
            service,
        }
    }

    pub fn register(&self, id: &str, affiliation: &str, attributes: &[(&str, &str)]) {
        let identity = attributes
            .iter()
            .fold(IdentityRecord::new(id, path(affiliation)), |identity, (k, v)| {
                identity.with_attribute(*k, *v)
            });
        self.store.insert_identity(identity).expect("register identity");
    }

    /// Issue a certificate to `id` and return its serial.
    pub fn enroll(&self, id: &str) -> String {
        let certificate = CertificateRecord::issue(id);
        let serial = certificate.serial.clone();
        self.store
            .insert_certificate(certificate)
            .expect("record certificate");
        serial
    }

    pub async fn caller(&self, id: &str) -> CallerAffiliation {
        self.service
            .caller_context(id)
            .await
            .expect("caller is registered")
    }

    pub async fn certificates(&self, id: &str) -> Vec<CertificateRecord> {
        self.store
            .find_certificates_by_identity(id)
            .await
            .expect("certificate lookup")
    }

    pub async fn identity(&self, id: &str) -> Option<IdentityRecord> {
        self.store.get_identity(id).await.expect("identity lookup")
    }

    pub async fn exists(&self, affiliation: &str) -> bool {
        self.store
            .get_affiliation(&path(affiliation))
            .await
            .expect("affiliation lookup")
            .is_some()
    }

    pub fn allow_removal(&self, affiliations: bool, identities: bool) {
        self.policy.set(RemovalPolicy::new(affiliations, identities));
    }
}
