//! Modify: renaming a subtree and moving the identities bound to it.

mod common;

use affiliation_service::models::{RevocationReason, ATTR_AFFILIATION_MGR};
use affiliation_service::services::{AffiliationError, Denial};
use common::{path, TestApp};

#[tokio::test]
async fn test_modify_cascade_sequence() {
    let app = TestApp::bootstrap("hyperledger");
    let admin = app.caller("admin").await;

    app.register("testuser1", "org2", &[]);
    app.enroll("testuser1");
    app.register("notregistrar", "", &[(ATTR_AFFILIATION_MGR, "true")]);
    let not_registrar = app.caller("notregistrar").await;

    let (org2, org3) = (path("org2"), path("org3"));

    let err = app
        .service
        .modify_affiliation(&org2, &org3, false, &admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AffiliationError::HasIdentities { .. }));

    let err = app
        .service
        .modify_affiliation(&org2, &org3, true, &not_registrar)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Authorization failure"));
    assert!(matches!(
        err,
        AffiliationError::AuthorizationFailure(Denial::NotRegistrar { .. })
    ));
    assert!(app.exists("org2").await);
    assert!(!app.exists("org3").await);
    assert_eq!(
        app.identity("testuser1").await.unwrap().affiliation,
        path("org2")
    );

    let result = app
        .service
        .modify_affiliation(&org2, &org3, true, &admin)
        .await
        .unwrap();

    assert!(app.exists("org3").await);
    assert!(app.exists("org3.dept1").await);
    let err = app
        .service
        .get_affiliation(&org2, &admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AffiliationError::NotFound(_)));

    let user = app.identity("testuser1").await.unwrap();
    assert_eq!(user.affiliation.to_string(), "org3");
    let certs = app.certificates("testuser1").await;
    assert!(certs[0].is_revoked());
    assert_eq!(certs[0].reason, Some(RevocationReason::AffiliationChanged));

    assert_eq!(result.affiliation_names(), vec!["org2.dept1", "org2"]);
    assert_eq!(result.identity_ids(), vec!["testuser1"]);
    assert_eq!(result.affiliations[0].new_path, Some(path("org3.dept1")));
    assert_eq!(result.identities[0].new_affiliation, Some(org3));
}

#[tokio::test]
async fn test_modify_is_not_gated_by_removal_policy() {
    let app = TestApp::bootstrap("hyperledger");
    let admin = app.caller("admin").await;

    let result = app
        .service
        .modify_affiliation(&path("org1"), &path("org5"), false, &admin)
        .await
        .unwrap();
    assert_eq!(
        result.affiliation_names(),
        vec!["org1.department1", "org1.department2", "org1"]
    );
    for affiliation in ["org5", "org5.department1", "org5.department2"] {
        assert!(app.exists(affiliation).await, "{affiliation} missing");
    }
    assert!(!app.exists("org1").await);
}

#[tokio::test]
async fn test_modify_moves_descendant_identities() {
    let app = TestApp::spawn();
    let admin = app.caller("admin").await;
    app.register("deep", "org2.dept1", &[]);

    app.service
        .modify_affiliation(&path("org2"), &path("org1.org2"), true, &admin)
        .await
        .unwrap();

    assert_eq!(
        app.identity("deep").await.unwrap().affiliation,
        path("org1.org2.dept1")
    );
    assert_eq!(
        app.identity("admin2").await.unwrap().affiliation,
        path("org1.org2")
    );
}

#[tokio::test]
async fn test_modify_validates_new_name() {
    let app = TestApp::spawn();
    let admin = app.caller("admin").await;
    let admin2 = app.caller("admin2").await;

    let err = app
        .service
        .modify_affiliation(&path("org2"), &path("org1"), true, &admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AffiliationError::AlreadyExists(_)));

    let err = app
        .service
        .modify_affiliation(&path("org2"), &path("org2.dept1.sub"), true, &admin)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_format");

    let err = app
        .service
        .modify_affiliation(&path("org2"), &path("org7.dept1"), true, &admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AffiliationError::ParentMissing { .. }));

    // The new name must also be within the caller's scope.
    let err = app
        .service
        .modify_affiliation(&path("org2.dept1"), &path("org1.dept1"), true, &admin2)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "authorization_failure");

    let err = app
        .service
        .modify_affiliation(&path("org9"), &path("org10"), true, &admin)
        .await
        .unwrap_err();
    assert!(matches!(err, AffiliationError::NotFound(_)));

    assert!(app.exists("org2").await);
    assert!(app.exists("org2.dept1").await);
}

#[tokio::test]
async fn test_non_registrar_can_modify_when_no_identities_are_bound() {
    let app = TestApp::spawn();
    app.register("mgr", "org1", &[(ATTR_AFFILIATION_MGR, "true")]);
    let mgr = app.caller("mgr").await;

    let result = app
        .service
        .modify_affiliation(
            &path("org1.department2"),
            &path("org1.department3"),
            false,
            &mgr,
        )
        .await
        .unwrap();

    assert_eq!(result.affiliation_names(), vec!["org1.department2"]);
    assert_eq!(
        result.affiliations[0].new_path,
        Some(path("org1.department3"))
    );
    assert!(result.identities.is_empty());
    assert!(app.exists("org1.department3").await);
    assert!(!app.exists("org1.department2").await);
}
