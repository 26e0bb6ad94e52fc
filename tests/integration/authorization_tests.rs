//! Tenant scoping, role, permission, subscription and field-projection tests

use serde_json::{json, Value};

use haven_gate::models::{RiskLevel, Role, SubscriptionStatus, SubscriptionTier};

use crate::common::TestApp;

fn resident_body() -> Value {
    json!({
        "firstName": "Jordan",
        "lastName": "Reyes",
        "dateOfBirth": "2006-03-14",
        "supportNeeds": "Weekly key-worker session",
        "benefitReference": "UC-48213",
        "rentArrearsPence": 12500
    })
}

#[tokio::test]
async fn test_cross_tenant_access_denied_and_audited() {
    let app = TestApp::new().await;
    let org_a = app
        .create_organization("Org A", SubscriptionTier::Professional, SubscriptionStatus::Active)
        .await;
    let org_b = app
        .create_organization("Org B", SubscriptionTier::Professional, SubscriptionStatus::Active)
        .await;
    app.create_member("manager@a.org", org_a.id, Role::Manager).await;
    let token = app.access_token("manager@a.org").await;

    let response = app
        .get_auth(
            &format!("/api/v1/organizations/{}/residents", org_b.id),
            &token,
        )
        .await;
    response.assert_forbidden_with("ORGANIZATION_ACCESS_DENIED");

    let by_query = app
        .get_auth(&format!("/api/v1/residents?organizationId={}", org_b.id), &token)
        .await;
    by_query.assert_forbidden_with("ORGANIZATION_ACCESS_DENIED");

    let denials = app.audit_events("authz.denied").await;
    assert_eq!(denials.len(), 2);
    for event in &denials {
        assert_eq!(event.organization_id, Some(org_b.id));
        assert_eq!(event.risk, RiskLevel::High);
        assert_eq!(event.metadata["reason"], "ORGANIZATION_ACCESS_DENIED");
    }
}

#[tokio::test]
async fn test_primary_organization_is_default_scope() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_member("worker@hillside.org", org.id, Role::SupportWorker)
        .await;
    let token = app.access_token("worker@hillside.org").await;

    let created = app
        .post_json_auth("/api/v1/residents", resident_body(), &token)
        .await;
    created.assert_created();
    let body: Value = created.json();
    assert_eq!(body["organizationId"], org.id.to_string());

    let scoped = app
        .get_auth(&format!("/api/v1/organizations/{}/residents", org.id), &token)
        .await;
    scoped.assert_ok();
    let residents: Vec<Value> = scoped.json();
    assert_eq!(residents.len(), 1);
}

#[tokio::test]
async fn test_role_is_evaluated_per_organization() {
    let app = TestApp::new().await;
    let home = app
        .create_organization("Home", SubscriptionTier::Professional, SubscriptionStatus::Active)
        .await;
    let partner = app
        .create_organization("Partner", SubscriptionTier::Professional, SubscriptionStatus::Active)
        .await;
    let user = app.create_member("dual@home.org", home.id, Role::Staff).await;
    app.add_member(user.id, partner.id, Role::Manager, false).await;
    let token = app.access_token("dual@home.org").await;

    // Staff in the primary organization cannot read reports
    let primary = app.get_auth("/api/v1/reports/occupancy", &token).await;
    primary.assert_forbidden_with("PERMISSION_DENIED");

    let by_path = app
        .get_auth(
            &format!("/api/v1/organizations/{}/reports/occupancy", partner.id),
            &token,
        )
        .await;
    by_path.assert_ok();
    let report: Value = by_path.json();
    assert_eq!(report["organizationId"], partner.id.to_string());

    let by_query = app
        .get_auth(
            &format!("/api/v1/reports/occupancy?organizationId={}", partner.id),
            &token,
        )
        .await;
    by_query.assert_ok();
}

#[tokio::test]
async fn test_invalid_organization_id_is_bad_request() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_member("staff@hillside.org", org.id, Role::Staff).await;
    let token = app.access_token("staff@hillside.org").await;

    let response = app
        .get_auth("/api/v1/residents?organizationId=not-a-uuid", &token)
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_missing_feature_is_denied() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Starter Org", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_member("manager@starter.org", org.id, Role::Manager)
        .await;
    let token = app.access_token("manager@starter.org").await;

    let response = app.get_auth("/api/v1/reports/occupancy", &token).await;
    response.assert_forbidden_with("FEATURE_NOT_AVAILABLE");
    let body: Value = response.json();
    assert_eq!(body["featureName"], "reporting");
}

#[tokio::test]
async fn test_missing_permission_is_denied() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_member("staff@hillside.org", org.id, Role::Staff).await;
    let token = app.access_token("staff@hillside.org").await;

    let response = app
        .post_json_auth("/api/v1/properties", json!({ "name": "Elm House" }), &token)
        .await;
    response.assert_forbidden_with("PERMISSION_DENIED");
    let body: Value = response.json();
    assert_eq!(body["requiredPermission"], "properties:write");

    // reads are still open to Staff
    app.get_auth("/api/v1/properties", &token).await.assert_ok();
}

#[tokio::test]
async fn test_tenant_audit_log_requires_admin() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_member("manager@hillside.org", org.id, Role::Manager)
        .await;
    app.create_member("admin@hillside.org", org.id, Role::Admin).await;
    let manager = app.access_token("manager@hillside.org").await;
    let admin = app.access_token("admin@hillside.org").await;
    let uri = format!("/api/v1/organizations/{}/audit", org.id);

    app.get_auth(&uri, &manager)
        .await
        .assert_forbidden_with("INSUFFICIENT_ROLE");

    let response = app.get_auth(&uri, &admin).await;
    response.assert_ok();
    let events: Vec<Value> = response.json();
    // the manager's denial was recorded against this organization
    assert!(events.iter().any(|e| e["action"] == "authz.denied"));
    assert!(events
        .iter()
        .all(|e| e["organizationId"] == org.id.to_string()));
}

#[tokio::test]
async fn test_tier_gate_reports_required_and_current_tier() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Pro Org", SubscriptionTier::Professional, SubscriptionStatus::Active)
        .await;
    app.create_member("manager@pro.org", org.id, Role::Manager).await;
    let token = app.access_token("manager@pro.org").await;

    let response = app
        .get_auth("/api/v1/reports/funding-claims", &token)
        .await;
    response.assert_forbidden_with("TIER_REQUIRED");
    let body: Value = response.json();
    assert_eq!(body["requiredTier"], "enterprise");
    assert_eq!(body["currentTier"], "professional");
}

#[tokio::test]
async fn test_funding_claims_needs_manager_and_is_audited() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Big Org", SubscriptionTier::Enterprise, SubscriptionStatus::Active)
        .await;
    app.create_member("staff@big.org", org.id, Role::Staff).await;
    app.create_member("manager@big.org", org.id, Role::Manager).await;
    let staff = app.access_token("staff@big.org").await;
    let manager = app.access_token("manager@big.org").await;

    app.post_json_auth("/api/v1/residents", resident_body(), &manager)
        .await
        .assert_created();

    app.get_auth("/api/v1/reports/funding-claims", &staff)
        .await
        .assert_forbidden_with("INSUFFICIENT_ROLE");

    let response = app
        .get_auth("/api/v1/reports/funding-claims", &manager)
        .await;
    response.assert_ok();
    let report: Value = response.json();
    assert_eq!(report["claimants"], 1);
    assert_eq!(report["totalArrearsPence"], 12500);

    let accesses = app.audit_events("resource.access").await;
    assert_eq!(accesses.len(), 1);
    assert_eq!(accesses[0].risk, RiskLevel::High);
    assert_eq!(accesses[0].organization_id, Some(org.id));
}

#[tokio::test]
async fn test_field_projection_follows_role() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Hillside", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_member("staff@hillside.org", org.id, Role::Staff).await;
    app.create_member("manager@hillside.org", org.id, Role::Manager)
        .await;
    let staff = app.access_token("staff@hillside.org").await;
    let manager = app.access_token("manager@hillside.org").await;

    let created: Value = app
        .post_json_auth("/api/v1/residents", resident_body(), &manager)
        .await
        .json();
    let uri = format!("/api/v1/residents/{}", created["id"].as_str().unwrap());

    let as_staff: Value = app.get_auth(&uri, &staff).await.json();
    assert_eq!(as_staff["firstName"], "Jordan");
    assert!(as_staff.get("sensitive").is_none());
    assert!(as_staff.get("financial").is_none());

    let as_manager: Value = app.get_auth(&uri, &manager).await.json();
    assert_eq!(as_manager["sensitive"]["supportNeeds"], "Weekly key-worker session");
    assert_eq!(as_manager["financial"]["rentArrearsPence"], 12500);

    // Staff saw no protected class, so only the manager's read was audited
    let accesses = app.audit_events("resource.access").await;
    assert_eq!(accesses.len(), 1);
    assert_eq!(accesses[0].risk, RiskLevel::High);
}

#[tokio::test]
async fn test_resident_in_other_organization_is_not_found() {
    let app = TestApp::new().await;
    let org_a = app
        .create_organization("Org A", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    let org_b = app
        .create_organization("Org B", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.create_member("manager@a.org", org_a.id, Role::Manager).await;
    app.create_member("manager@b.org", org_b.id, Role::Manager).await;
    let token_a = app.access_token("manager@a.org").await;
    let token_b = app.access_token("manager@b.org").await;

    let created: Value = app
        .post_json_auth("/api/v1/residents", resident_body(), &token_b)
        .await
        .json();

    let response = app
        .get_auth(
            &format!("/api/v1/residents/{}", created["id"].as_str().unwrap()),
            &token_a,
        )
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_paused_subscription_blocks_gated_routes() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Paused Org", SubscriptionTier::Starter, SubscriptionStatus::Paused)
        .await;
    app.create_member("manager@paused.org", org.id, Role::Manager)
        .await;
    let token = app.access_token("manager@paused.org").await;

    let response = app.get_auth("/api/v1/residents", &token).await;
    response.assert_forbidden_with("SUBSCRIPTION_INACTIVE");
    let body: Value = response.json();
    assert_eq!(body["subscriptionStatus"], "paused");

    // entitlements stay readable so the UI can explain the lapse
    let entitlements = app.get_auth("/api/v1/entitlements", &token).await;
    entitlements.assert_ok();
    let body: Value = entitlements.json();
    assert_eq!(body["status"], "paused");
}
