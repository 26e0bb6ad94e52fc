//! Platform-operator console tests: the role/MFA/IP gate and emergency actions

use serde_json::{json, Value};

use haven_gate::{
    db::{OrganizationRepository, UserRepository},
    models::{AuditOutcome, RiskLevel, Role, SubscriptionStatus, SubscriptionTier},
};

use crate::common::TestApp;

#[tokio::test]
async fn test_tenant_user_is_refused() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Enterprise, SubscriptionStatus::Active)
        .await;
    app.create_member("owner@hillside.org", org.id, Role::Owner).await;
    let token = app.access_token("owner@hillside.org").await;

    app.get_auth("/api/v1/platform-admin/overview", &token)
        .await
        .assert_forbidden_with("PLATFORM_ADMIN_REQUIRED");

    let events = app.audit_events("platform.access").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].risk, RiskLevel::High);
    assert_eq!(events[0].outcome, AuditOutcome::Failure);
    assert_eq!(events[0].metadata["reason"], "PLATFORM_ADMIN_REQUIRED");
}

#[tokio::test]
async fn test_admin_without_mfa_is_refused() {
    let app = TestApp::new().await;
    app.create_user("ops@haven.example", Role::PlatformAdmin).await;
    let token = app.access_token("ops@haven.example").await;

    app.get_auth("/api/v1/platform-admin/overview", &token)
        .await
        .assert_forbidden_with("MFA_REQUIRED");

    let events = app.audit_events("platform.access").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].risk, RiskLevel::High);
    assert_eq!(events[0].metadata["reason"], "MFA_REQUIRED");
}

#[tokio::test]
async fn test_mfa_is_checked_on_the_live_account() {
    let app = TestApp::new().await;
    let (admin, token) = app.platform_admin("ops@haven.example").await;

    app.get_auth("/api/v1/platform-admin/overview", &token)
        .await
        .assert_ok();

    UserRepository::new(&app.state.db)
        .set_mfa(admin.id, None, false)
        .await
        .unwrap();

    app.get_auth("/api/v1/platform-admin/overview", &token)
        .await
        .assert_forbidden_with("MFA_REQUIRED");
}

#[tokio::test]
async fn test_address_outside_allowlist_is_refused() {
    let app = TestApp::new().await;
    let (_, token) = app.platform_admin("ops@haven.example").await;

    app.get_auth_from("/api/v1/platform-admin/overview", &token, "192.168.1.5")
        .await
        .assert_forbidden_with("IP_NOT_ALLOWED");

    app.get_auth_from("/api/v1/platform-admin/overview", &token, "10.20.30.40")
        .await
        .assert_ok();

    let events = app.audit_events("platform.access").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ip_address.as_deref(), Some("192.168.1.5"));
}

#[tokio::test]
async fn test_overview_aggregates_across_tenants() {
    let app = TestApp::new().await;
    let starter = app
        .create_organization("Starter", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_organization("Paused", SubscriptionTier::Professional, SubscriptionStatus::Paused)
        .await;
    app.seed_residents(starter.id, 4).await;
    let (_, token) = app.platform_admin("ops@haven.example").await;

    let response = app
        .get_auth("/api/v1/platform-admin/overview", &token)
        .await;
    response.assert_ok();
    let body: Value = response.json();
    assert_eq!(body["organizations"]["total"], 2);
    assert_eq!(body["organizations"]["totalResidents"], 4);
    assert_eq!(body["organizations"]["byStatus"]["paused"], 1);
    assert_eq!(body["auditWriteFailures"], 0);
}

#[tokio::test]
async fn test_disable_organization_pauses_subscription() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_member("manager@hillside.org", org.id, Role::Manager)
        .await;
    let manager = app.access_token("manager@hillside.org").await;
    let (_, token) = app.platform_admin("ops@haven.example").await;
    let uri = format!("/api/v1/platform-admin/organizations/{}/disable", org.id);

    let response = app
        .post_json_auth(&uri, json!({ "reason": "Suspected account takeover" }), &token)
        .await;
    response.assert_ok();
    let body: Value = response.json();
    assert_eq!(body["authorized"], true);

    let stored = OrganizationRepository::new(&app.state.db)
        .get_by_id(org.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.subscription_status, SubscriptionStatus::Paused);

    // intent is logged before the change, completion after
    let events = app.audit_events("platform.organization.disable").await;
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].metadata["phase"], "completed");
    assert_eq!(events[1].metadata["phase"], "intent");
    assert_eq!(events[1].metadata["reason"], "Suspected account takeover");
    assert!(events.iter().all(|e| e.risk == RiskLevel::Critical));

    app.get_auth("/api/v1/residents", &manager)
        .await
        .assert_forbidden_with("SUBSCRIPTION_INACTIVE");

    // paused cannot be paused again
    app.post_json_auth(&uri, json!({ "reason": "Again" }), &token)
        .await
        .assert_forbidden_with("EMERGENCY_ACTION_DENIED");
}

#[tokio::test]
async fn test_emergency_dry_run_performs_no_writes() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    let target = app
        .create_member("manager@hillside.org", org.id, Role::Manager)
        .await;
    let (admin, token) = app.platform_admin("ops@haven.example").await;

    let response = app
        .post_json_auth(
            "/api/v1/platform-admin/emergency/authorize",
            json!({ "action": "force_password_reset", "targetId": target.id }),
            &token,
        )
        .await;
    response.assert_ok();
    let body: Value = response.json();
    assert_eq!(body["authorized"], true);

    let own: Value = app
        .post_json_auth(
            "/api/v1/platform-admin/emergency/authorize",
            json!({ "action": "force_password_reset", "targetId": admin.id }),
            &token,
        )
        .await
        .json();
    assert_eq!(own["authorized"], false);

    let stored = UserRepository::new(&app.state.db)
        .get_by_id(target.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.force_password_change);
    assert!(app
        .audit_events("platform.user.force_password_reset")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_force_password_reset_flags_account() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    let target = app
        .create_member("manager@hillside.org", org.id, Role::Manager)
        .await;
    let (_, token) = app.platform_admin("ops@haven.example").await;

    app.post_json_auth(
        &format!("/api/v1/platform-admin/users/{}/force-password-reset", target.id),
        json!({ "reason": "Credential stuffing report" }),
        &token,
    )
    .await
    .assert_ok();

    let stored = UserRepository::new(&app.state.db)
        .get_by_id(target.id)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.force_password_change);
}

#[tokio::test]
async fn test_audit_listing_and_chain_verification() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_member("manager@hillside.org", org.id, Role::Manager)
        .await;
    app.access_token("manager@hillside.org").await;
    let (_, token) = app.platform_admin("ops@haven.example").await;

    let response = app
        .get_auth("/api/v1/platform-admin/audit?action=auth.login", &token)
        .await;
    response.assert_ok();
    let events: Vec<Value> = response.json();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e["action"] == "auth.login"));

    let response = app
        .get_auth("/api/v1/platform-admin/audit/verify", &token)
        .await;
    response.assert_ok();
    let body: Value = response.json();
    assert_eq!(body["valid"], true);
    assert!(body["eventsChecked"].as_u64().unwrap() > 0);
}
