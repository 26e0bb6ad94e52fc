//! Token authentication middleware
//!
//! Reads an access token from `Authorization: Bearer` or, for browser clients,
//! the `access_token` cookie. Cookie-authenticated requests that change state
//! must also carry `X-CSRF-Token` bound to the token's id.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use serde_json::json;
use uuid::Uuid;

use crate::{
    middleware::rate_limit::client_ip,
    models::{Claims, NewAuditEvent, RiskLevel, Role},
    utils::{AppError, AppResult},
    AppState,
};

pub const ACCESS_COOKIE: &str = "access_token";
pub const REFRESH_COOKIE: &str = "refresh_token";
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Authenticated caller, attached to request extensions by the middleware
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub claims: Claims,
    /// Token came from the session cookie rather than the Authorization header
    pub via_cookie: bool,
}

impl AuthUser {
    pub fn user_id(&self) -> Uuid {
        self.claims.user_id
    }

    /// Role in the primary organization, or `platform_admin`
    pub fn role(&self) -> Role {
        self.claims.role
    }
}

/// Extractor for AuthUser from request extensions
///
/// This allows using AuthUser as a handler parameter after auth middleware has run.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .or_else(|| auth_header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Access token and whether it came from the cookie
fn locate_token(headers: &HeaderMap) -> Option<(String, bool)> {
    if let Some(header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        return extract_bearer_token(header).map(|t| (t.to_string(), false));
    }
    CookieJar::from_headers(headers)
        .get(ACCESS_COOKIE)
        .map(|cookie| (cookie.value().to_string(), true))
}

/// Verify whatever credential the request carries; `Ok(None)` when it carries none
fn authenticate(state: &AppState, request: &Request) -> AppResult<Option<AuthUser>> {
    let Some((token, via_cookie)) = locate_token(request.headers()) else {
        return Ok(None);
    };
    let claims = state.tokens.verify(&token)?;

    if via_cookie && !request.method().is_safe() {
        let presented = request
            .headers()
            .get(CSRF_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        if !state.tokens.verify_csrf(&claims.jti, presented) {
            return Err(AppError::forbidden(
                "CSRF_TOKEN_INVALID",
                "A valid X-CSRF-Token header is required",
                [],
            ));
        }
    }

    Ok(Some(AuthUser { claims, via_cookie }))
}

/// Authentication middleware
///
/// Rejects with 401 when no valid access token is present. Every rejection is
/// written to the audit ledger.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    match authenticate(&state, &request) {
        Ok(Some(user)) => {
            request.extensions_mut().insert(user);
            Ok(next.run(request).await)
        }
        Ok(None) => {
            let event = rejection_event(&state, &request, &AppError::Unauthorized);
            state.audit.record(event).await;
            Err(AppError::Unauthorized)
        }
        Err(err) => {
            let event = rejection_event(&state, &request, &err);
            state.audit.record(event).await;
            Err(err)
        }
    }
}

/// Audit event for a rejected request, built before any await so the
/// request is not held across it
fn rejection_event(state: &AppState, request: &Request, err: &AppError) -> NewAuditEvent {
    let risk = if err.status().as_u16() == 403 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    };
    let ip = client_ip(
        request.headers(),
        request.extensions(),
        state.config.server.trust_proxy_headers,
    );
    NewAuditEvent::new("authz.denied", super::request_path(request))
        .failure()
        .risk(risk)
        .metadata(json!({
            "reason": err.error_label(),
            "method": request.method().as_str(),
        }))
        .ip(ip.map(|ip| ip.to_string()))
}
