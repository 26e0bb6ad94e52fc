//! Subscription entitlement and quota tests

use chrono::{Duration, Utc};
use futures::future::join_all;
use serde_json::{json, Value};

use haven_gate::models::{NewOrganization, Role, SubscriptionStatus, SubscriptionTier};

use crate::common::TestApp;

#[tokio::test]
async fn test_entitlements_reflect_plan_defaults() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Pro Org", SubscriptionTier::Professional, SubscriptionStatus::Active)
        .await;
    app.create_member("staff@pro.org", org.id, Role::Staff).await;
    let token = app.access_token("staff@pro.org").await;

    let response = app.get_auth("/api/v1/entitlements", &token).await;
    response.assert_ok();
    let body: Value = response.json();
    assert_eq!(body["organizationId"], org.id.to_string());
    assert_eq!(body["tier"], "professional");
    assert_eq!(body["status"], "active");
    assert_eq!(body["features"]["reporting"], true);
    assert!(body["features"].get("government_billing").is_none());
    assert_eq!(body["limits"]["maxResidents"], 100);
    assert_eq!(body["limits"]["maxProperties"], 20);
    assert_eq!(body["usage"]["residents"], 0);
}

#[tokio::test]
async fn test_entitlements_for_explicit_organization() {
    let app = TestApp::new().await;
    let home = app
        .create_organization("Home", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    let partner = app
        .create_organization("Partner", SubscriptionTier::Enterprise, SubscriptionStatus::Active)
        .await;
    let user = app.create_member("dual@home.org", home.id, Role::Staff).await;
    app.add_member(user.id, partner.id, Role::Staff, false).await;
    let token = app.access_token("dual@home.org").await;

    let body: Value = app
        .get_auth(
            &format!("/api/v1/organizations/{}/entitlements", partner.id),
            &token,
        )
        .await
        .json();
    assert_eq!(body["tier"], "enterprise");

    let body: Value = app.get_auth("/api/v1/entitlements", &token).await.json();
    assert_eq!(body["tier"], "starter");
}

#[tokio::test]
async fn test_expired_trial_reads_as_cancelled() {
    let app = TestApp::new().await;
    let mut new = NewOrganization::new("Lapsed", SubscriptionTier::Trial, SubscriptionStatus::Trial);
    new.trial_end_date = Some(Utc::now() - Duration::days(1));
    let org = app.create_organization_with(new).await;
    app.create_member("manager@lapsed.org", org.id, Role::Manager)
        .await;
    let token = app.access_token("manager@lapsed.org").await;

    let body: Value = app.get_auth("/api/v1/entitlements", &token).await.json();
    assert_eq!(body["status"], "cancelled");

    let response = app.get_auth("/api/v1/residents", &token).await;
    response.assert_forbidden_with("SUBSCRIPTION_INACTIVE");
    let body: Value = response.json();
    assert_eq!(body["subscriptionStatus"], "cancelled");
}

#[tokio::test]
async fn test_running_trial_is_usable() {
    let app = TestApp::new().await;
    let mut new = NewOrganization::new("Fresh", SubscriptionTier::Trial, SubscriptionStatus::Trial);
    new.trial_end_date = Some(Utc::now() + Duration::days(13));
    let org = app.create_organization_with(new).await;
    app.create_member("manager@fresh.org", org.id, Role::Manager)
        .await;
    let token = app.access_token("manager@fresh.org").await;

    let body: Value = app.get_auth("/api/v1/entitlements", &token).await.json();
    assert_eq!(body["status"], "trial");
    app.get_auth("/api/v1/residents", &token).await.assert_ok();
}

#[tokio::test]
async fn test_elapsed_subscription_period_reads_as_cancelled() {
    let app = TestApp::new().await;
    let mut new = NewOrganization::new("Overdue", SubscriptionTier::Starter, SubscriptionStatus::Active);
    new.subscription_end_date = Some(Utc::now() - Duration::hours(1));
    let org = app.create_organization_with(new).await;
    app.create_member("staff@overdue.org", org.id, Role::Staff).await;
    let token = app.access_token("staff@overdue.org").await;

    let body: Value = app.get_auth("/api/v1/entitlements", &token).await.json();
    assert_eq!(body["status"], "cancelled");
}

#[tokio::test]
async fn test_missing_feature_is_named_even_on_lapsed_subscription() {
    let app = TestApp::new().await;
    let mut starter = NewOrganization::new("Lapsed Starter", SubscriptionTier::Starter, SubscriptionStatus::Active);
    starter.subscription_end_date = Some(Utc::now() - Duration::days(1));
    let starter = app.create_organization_with(starter).await;
    app.create_member("manager@starter.org", starter.id, Role::Manager)
        .await;
    let token = app.access_token("manager@starter.org").await;

    let response = app.get_auth("/api/v1/reports/occupancy", &token).await;
    response.assert_forbidden_with("FEATURE_NOT_AVAILABLE");
    let body: Value = response.json();
    assert_eq!(body["featureName"], "reporting");

    // the feature is on the plan, so the lapsed status is what blocks
    let mut pro = NewOrganization::new("Lapsed Pro", SubscriptionTier::Professional, SubscriptionStatus::Active);
    pro.subscription_end_date = Some(Utc::now() - Duration::days(1));
    let pro = app.create_organization_with(pro).await;
    app.create_member("manager@pro.org", pro.id, Role::Manager).await;
    let token = app.access_token("manager@pro.org").await;

    let response = app.get_auth("/api/v1/reports/occupancy", &token).await;
    response.assert_forbidden_with("SUBSCRIPTION_INACTIVE");
    let body: Value = response.json();
    assert_eq!(body["subscriptionStatus"], "cancelled");
}

#[tokio::test]
async fn test_resident_quota_reached() {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Full House", SubscriptionTier::Starter, SubscriptionStatus::Active)
        .await;
    app.seed_residents(org.id, 25).await;
    app.create_member("manager@full.org", org.id, Role::Manager).await;
    let token = app.access_token("manager@full.org").await;

    let response = app
        .post_json_auth(
            "/api/v1/residents",
            json!({ "firstName": "Late", "lastName": "Arrival" }),
            &token,
        )
        .await;
    response.assert_forbidden_with("Resident limit reached");
    let body: Value = response.json();
    assert_eq!(body["currentCount"], 25);
    assert_eq!(body["maxAllowed"], 25);

    let body: Value = app.get_auth("/api/v1/entitlements", &token).await.json();
    assert_eq!(body["usage"]["residents"], 25);
}

#[tokio::test]
async fn test_property_quota_override() {
    let app = TestApp::new().await;
    let mut new = NewOrganization::new("Tiny", SubscriptionTier::Starter, SubscriptionStatus::Active);
    new.max_properties = Some(1);
    let org = app.create_organization_with(new).await;
    app.create_member("manager@tiny.org", org.id, Role::Manager).await;
    let token = app.access_token("manager@tiny.org").await;

    app.post_json_auth("/api/v1/properties", json!({ "name": "Elm House" }), &token)
        .await
        .assert_created();

    let response = app
        .post_json_auth("/api/v1/properties", json!({ "name": "Oak House" }), &token)
        .await;
    response.assert_forbidden_with("Property limit reached");
    let body: Value = response.json();
    assert_eq!(body["maxAllowed"], 1);

    let properties: Vec<Value> = app.get_auth("/api/v1/properties", &token).await.json();
    assert_eq!(properties.len(), 1);
}

#[tokio::test]
async fn test_concurrent_creates_never_exceed_quota() {
    let app = TestApp::new().await;
    let mut new = NewOrganization::new("Race", SubscriptionTier::Starter, SubscriptionStatus::Active);
    new.max_residents = Some(3);
    let org = app.create_organization_with(new).await;
    app.create_member("manager@race.org", org.id, Role::Manager).await;
    let token = app.access_token("manager@race.org").await;

    let attempts = (0..8).map(|i| {
        app.post_json_auth(
            "/api/v1/residents",
            json!({ "firstName": format!("Racer{}", i), "lastName": "Test" }),
            &token,
        )
    });
    let responses = join_all(attempts).await;

    let created = responses
        .iter()
        .filter(|r| r.status == axum::http::StatusCode::CREATED)
        .count();
    assert_eq!(created, 3);
    for rejected in responses
        .iter()
        .filter(|r| r.status != axum::http::StatusCode::CREATED)
    {
        rejected.assert_forbidden_with("Resident limit reached");
    }

    // Whether the guard or the counter update turned a racer away, it is audited
    let denials = app.audit_events("authz.denied").await;
    assert_eq!(denials.len(), 5);
    for event in &denials {
        assert_eq!(event.resource, "/api/v1/residents");
        assert_eq!(event.organization_id, Some(org.id));
        assert_eq!(event.metadata["reason"], "Resident limit reached");
    }

    let residents: Vec<Value> = app.get_auth("/api/v1/residents", &token).await.json();
    assert_eq!(residents.len(), 3);
}

#[tokio::test]
async fn test_feature_override_replaces_plan_defaults() {
    let app = TestApp::new().await;
    let mut new = NewOrganization::new("Custom", SubscriptionTier::Starter, SubscriptionStatus::Active);
    new.features = Some([("reporting".to_string(), true)].into_iter().collect());
    let org = app.create_organization_with(new).await;
    app.create_member("manager@custom.org", org.id, Role::Manager)
        .await;
    let token = app.access_token("manager@custom.org").await;

    let response = app.get_auth("/api/v1/reports/occupancy", &token).await;
    response.assert_ok();
    let report: Value = response.json();
    assert_eq!(report["maxResidents"], 25);
    assert_eq!(report["utilisationPercent"], 0.0);
}
