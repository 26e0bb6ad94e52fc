//! Authentication gateway tests: login, lockout, tokens, MFA, cookies and reset

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use chrono::{Duration, Utc};
use serde_json::json;

use haven_gate::{
    db::UserRepository,
    models::{Role, SubscriptionStatus, SubscriptionTier},
};

use crate::common::{totp_now, TestApp, TEST_PASSWORD};

async fn app_with_member(email: &str) -> (TestApp, uuid::Uuid) {
    let app = TestApp::new().await;
    let org = app
        .create_organization("Northside Housing", SubscriptionTier::Professional, SubscriptionStatus::Active)
        .await;
    app.create_member(email, org.id, Role::Manager).await;
    (app, org.id)
}

#[tokio::test]
async fn test_login_returns_tenant_aware_tokens() {
    let (app, org_id) = app_with_member("manager@example.com").await;

    let body = app.login("manager@example.com").await;
    assert_eq!(body["tokenType"], "Bearer");
    assert_eq!(body["expiresIn"], 900);
    assert!(body.get("csrfToken").is_none());

    let token = body["accessToken"].as_str().unwrap();
    let claims = app.state.tokens.verify(token).unwrap();
    assert_eq!(claims.role, Role::Manager);
    assert_eq!(claims.primary_organization_id, Some(org_id));
    assert_eq!(claims.tenant_id, Some(org_id));
    assert_eq!(claims.organizations.len(), 1);
    assert!(claims.organizations[0].is_primary);
    assert_eq!(claims.features.get("reporting"), Some(&true));

    let me = app.get_auth("/api/v1/auth/me", token).await;
    me.assert_ok();
    let me: serde_json::Value = me.json();
    assert_eq!(me["user"]["email"], "manager@example.com");
    assert_eq!(me["context"]["primaryOrganizationId"], json!(org_id));
}

#[tokio::test]
async fn test_unknown_email_and_wrong_password_are_indistinguishable() {
    let (app, _) = app_with_member("staff@example.com").await;

    let unknown = app
        .post_json(
            "/api/v1/auth/login",
            json!({ "email": "nobody@example.com", "password": TEST_PASSWORD }),
        )
        .await;
    let wrong = app
        .post_json(
            "/api/v1/auth/login",
            json!({ "email": "staff@example.com", "password": "not-the-password-1" }),
        )
        .await;

    unknown.assert_unauthorized();
    wrong.assert_unauthorized();
    assert_eq!(unknown.text(), wrong.text());
    assert_eq!(unknown.error_label(), "INVALID_CREDENTIALS");
}

#[tokio::test]
async fn test_lockout_is_per_account_across_ips() {
    let (app, _) = app_with_member("user@example.com").await;

    for attempt in 0..5 {
        let ip = if attempt % 2 == 0 { "10.1.1.1" } else { "10.1.1.2" };
        let response = app
            .post_json_from(
                "/api/v1/auth/login",
                json!({ "email": "user@example.com", "password": "wrong-password-1" }),
                ip,
            )
            .await;
        response.assert_unauthorized();
        assert_eq!(response.error_label(), "INVALID_CREDENTIALS");
    }

    // Correct password, fresh address: still locked
    let response = app
        .post_json_from(
            "/api/v1/auth/login",
            json!({ "email": "user@example.com", "password": TEST_PASSWORD }),
            "10.1.1.3",
        )
        .await;
    response.assert_unauthorized();
    assert_eq!(response.error_label(), "ACCOUNT_LOCKED");
    let body: serde_json::Value = response.json();
    assert!(body["retryAfter"].as_u64().unwrap() > 0);
    assert!(response.headers.contains_key(header::RETRY_AFTER));
}

#[tokio::test]
async fn test_auth_rate_limit_returns_retry_after() {
    let (app, _) = app_with_member("user@example.com").await;

    for _ in 0..5 {
        app.post_json_from(
            "/api/v1/auth/forgot-password",
            json!({ "email": "user@example.com" }),
            "10.9.9.9",
        )
        .await
        .assert_ok();
    }

    let response = app
        .post_json_from(
            "/api/v1/auth/forgot-password",
            json!({ "email": "user@example.com" }),
            "10.9.9.9",
        )
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "RATE_LIMITED");
    assert!(body["retryAfter"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_expired_access_token_can_still_be_refreshed() {
    let (app, _) = app_with_member("manager@example.com").await;
    let user = UserRepository::new(&app.state.db)
        .get_by_email("manager@example.com")
        .await
        .unwrap()
        .unwrap();
    let context = app.state.tenants.resolve(user.id).await.unwrap().unwrap();
    let pair = app
        .state
        .tokens
        .issue_at(&context, Utc::now() - Duration::minutes(20))
        .unwrap();

    let response = app.get_auth("/api/v1/auth/me", &pair.access_token).await;
    response.assert_unauthorized();
    assert_eq!(response.error_label(), "TOKEN_EXPIRED");

    let refreshed = app
        .post_json(
            "/api/v1/auth/refresh",
            json!({ "refreshToken": pair.refresh_token }),
        )
        .await;
    refreshed.assert_ok();
    let body: serde_json::Value = refreshed.json();
    let fresh = body["accessToken"].as_str().unwrap();
    app.get_auth("/api/v1/auth/me", fresh).await.assert_ok();
}

#[tokio::test]
async fn test_refresh_without_membership_fails_tenant_resolution() {
    let (app, _) = app_with_member("leaver@example.com").await;
    let body = app.login("leaver@example.com").await;
    let refresh_token = body["refreshToken"].as_str().unwrap().to_string();

    let user = UserRepository::new(&app.state.db)
        .get_by_email("leaver@example.com")
        .await
        .unwrap()
        .unwrap();
    UserRepository::new(&app.state.db)
        .deactivate(user.id)
        .await
        .unwrap();

    let response = app
        .post_json(
            "/api/v1/auth/refresh",
            json!({ "refreshToken": refresh_token }),
        )
        .await;
    response.assert_forbidden();
    assert_eq!(response.error_label(), "TENANT_RESOLUTION_FAILED");
}

#[tokio::test]
async fn test_access_token_is_not_a_refresh_token() {
    let (app, _) = app_with_member("manager@example.com").await;
    let access = app.access_token("manager@example.com").await;

    let response = app
        .post_json("/api/v1/auth/refresh", json!({ "refreshToken": access }))
        .await;
    response.assert_unauthorized();
    assert_eq!(response.error_label(), "TOKEN_INVALID");
}

#[tokio::test]
async fn test_mfa_login_requires_second_step() {
    let (app, _) = app_with_member("mfa@example.com").await;
    let user = UserRepository::new(&app.state.db)
        .get_by_email("mfa@example.com")
        .await
        .unwrap()
        .unwrap();
    let secret = app.enable_mfa(&user).await;

    let challenge = app
        .post_json(
            "/api/v1/auth/login",
            json!({ "email": "mfa@example.com", "password": TEST_PASSWORD }),
        )
        .await;
    challenge.assert_ok();
    let challenge: serde_json::Value = challenge.json();
    assert_eq!(challenge["mfaRequired"], true);
    assert!(challenge.get("accessToken").is_none());
    let mfa_token = challenge["mfaToken"].as_str().unwrap();

    // The challenge token does not open protected routes
    app.get_auth("/api/v1/auth/me", mfa_token)
        .await
        .assert_unauthorized();

    let wrong = app
        .post_json(
            "/api/v1/auth/mfa/verify",
            json!({ "mfaToken": mfa_token, "code": "000000" }),
        )
        .await;
    // 000000 may collide with the real code once in a million runs
    if wrong.status != StatusCode::OK {
        wrong.assert_unauthorized();
    }

    let verified = app
        .post_json(
            "/api/v1/auth/mfa/verify",
            json!({ "mfaToken": mfa_token, "code": totp_now(&secret, "mfa@example.com") }),
        )
        .await;
    verified.assert_ok();
    let body: serde_json::Value = verified.json();
    let claims = app
        .state
        .tokens
        .verify(body["accessToken"].as_str().unwrap())
        .unwrap();
    assert!(claims.mfa_enabled);
}

#[tokio::test]
async fn test_mfa_enrollment_lifecycle() {
    let (app, _) = app_with_member("enrol@example.com").await;
    let token = app.access_token("enrol@example.com").await;

    let setup = app
        .post_json_auth("/api/v1/auth/mfa/setup", json!({}), &token)
        .await;
    setup.assert_ok();
    let setup: serde_json::Value = setup.json();
    let secret = setup["secret"].as_str().unwrap().to_string();
    assert!(setup["otpauthUrl"].as_str().unwrap().starts_with("otpauth://totp/"));

    let enable = app
        .post_json_auth(
            "/api/v1/auth/mfa/enable",
            json!({ "code": totp_now(&secret, "enrol@example.com") }),
            &token,
        )
        .await;
    enable.assert_status(StatusCode::NO_CONTENT);

    let user = UserRepository::new(&app.state.db)
        .get_by_email("enrol@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(user.mfa_enabled);

    let again = app
        .post_json_auth("/api/v1/auth/mfa/setup", json!({}), &token)
        .await;
    again.assert_status(StatusCode::BAD_REQUEST);
}

fn cookie_request(method: &str, uri: &str, access_cookie: &str, csrf: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::COOKIE, format!("access_token={}", access_cookie))
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(csrf) = csrf {
        builder = builder.header("X-CSRF-Token", csrf);
    }
    builder.body(Body::from("{}")).unwrap()
}

#[tokio::test]
async fn test_cookie_session_requires_csrf_for_state_changes() {
    let (app, _) = app_with_member("browser@example.com").await;

    let login = app
        .post_json(
            "/api/v1/auth/login",
            json!({
                "email": "browser@example.com",
                "password": TEST_PASSWORD,
                "useCookies": true,
            }),
        )
        .await;
    login.assert_ok();
    let cookies = login.cookies();
    assert!(cookies
        .iter()
        .any(|c| c.starts_with("access_token=") && c.contains("HttpOnly") && c.contains("SameSite=Strict")));
    assert!(cookies.iter().any(|c| c.starts_with("refresh_token=")));

    let body: serde_json::Value = login.json();
    let access = body["accessToken"].as_str().unwrap().to_string();
    let csrf = body["csrfToken"].as_str().unwrap().to_string();

    // Safe methods need no CSRF token
    app.request(cookie_request("GET", "/api/v1/auth/me", &access, None))
        .await
        .assert_ok();

    let missing = app
        .request(cookie_request("POST", "/api/v1/auth/mfa/setup", &access, None))
        .await;
    missing.assert_forbidden_with("CSRF_TOKEN_INVALID");

    let forged = app
        .request(cookie_request("POST", "/api/v1/auth/mfa/setup", &access, Some("deadbeef")))
        .await;
    forged.assert_forbidden_with("CSRF_TOKEN_INVALID");

    app.request(cookie_request("POST", "/api/v1/auth/mfa/setup", &access, Some(&csrf)))
        .await
        .assert_ok();
}

#[tokio::test]
async fn test_logout_clears_cookies() {
    let app = TestApp::new().await;
    let response = app.post_json("/api/v1/auth/logout", json!({})).await;
    response.assert_status(StatusCode::NO_CONTENT);
    let cookies = response.cookies();
    assert_eq!(cookies.len(), 2);
    assert!(cookies.iter().any(|c| c.starts_with("access_token=")));
    assert!(cookies.iter().any(|c| c.starts_with("refresh_token=")));
    assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
}

#[tokio::test]
async fn test_password_reset_flow() {
    let (app, _) = app_with_member("forgetful@example.com").await;

    let known = app
        .post_json(
            "/api/v1/auth/forgot-password",
            json!({ "email": "forgetful@example.com" }),
        )
        .await;
    let unknown = app
        .post_json(
            "/api/v1/auth/forgot-password",
            json!({ "email": "ghost@example.com" }),
        )
        .await;
    known.assert_ok();
    assert_eq!(known.text(), unknown.text());

    // Only the real account got a reset delivered
    let delivered = app.resets.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].email, "forgetful@example.com");
    let token = app
        .resets
        .last_token_for("forgetful@example.com")
        .expect("reset token for a local account");

    let weak = app
        .post_json(
            "/api/v1/auth/reset-password",
            json!({ "token": token, "newPassword": "short" }),
        )
        .await;
    weak.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    app.post_json(
        "/api/v1/auth/reset-password",
        json!({ "token": token, "newPassword": "a-much-better-passw0rd" }),
    )
    .await
    .assert_status(StatusCode::NO_CONTENT);

    // Single use
    app.post_json(
        "/api/v1/auth/reset-password",
        json!({ "token": token, "newPassword": "another-good-passw0rd" }),
    )
    .await
    .assert_status(StatusCode::BAD_REQUEST);

    let login = app
        .post_json_from(
            "/api/v1/auth/login",
            json!({ "email": "forgetful@example.com", "password": "a-much-better-passw0rd" }),
            "10.2.2.2",
        )
        .await;
    login.assert_ok();
}

#[tokio::test]
async fn test_protected_route_without_token() {
    let app = TestApp::new().await;
    let response = app.get("/api/v1/auth/me").await;
    response.assert_unauthorized();
    assert_eq!(response.error_label(), "UNAUTHORIZED");

    let events = app.audit_events("authz.denied").await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].resource, "/api/v1/auth/me");
    assert!(events[0].organization_id.is_none());
    assert_eq!(events[0].metadata["reason"], "UNAUTHORIZED");
    assert_eq!(events[0].metadata["method"], "GET");
    assert_eq!(events[0].ip_address.as_deref(), Some("127.0.0.1"));
}
