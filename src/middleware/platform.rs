//! Platform-operator gate
//!
//! Cross-tenant routes require, in order: the `platform_admin` role, MFA
//! enabled on the live account, and a client address inside the configured
//! allow-list. Each refusal is a 403 audited at high risk.

use std::net::IpAddr;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use ipnet::IpNet;
use serde_json::json;
use tracing::warn;

use crate::{
    db::UserRepository,
    middleware::{auth::AuthUser, rate_limit::client_ip},
    models::{NewAuditEvent, RiskLevel},
    utils::{AppError, AppResult},
    AppState,
};

/// Whether `ip` falls inside the allow-list; an empty list admits nobody
pub fn ip_allowed(allowlist: &[IpNet], ip: Option<IpAddr>) -> bool {
    ip.is_some_and(|ip| allowlist.iter().any(|net| net.contains(&ip)))
}

async fn check(state: &AppState, user: &AuthUser, ip: Option<IpAddr>) -> AppResult<()> {
    if !user.role().is_platform() {
        return Err(AppError::forbidden(
            "PLATFORM_ADMIN_REQUIRED",
            "Platform administrator role required",
            [],
        ));
    }

    // claims may predate an MFA change; read the account
    let mfa_enabled = UserRepository::new(&state.db)
        .get_by_id(user.user_id())
        .await?
        .is_some_and(|identity| identity.is_active && identity.mfa_enabled);
    if !mfa_enabled {
        return Err(AppError::forbidden(
            "MFA_REQUIRED",
            "Multi-factor authentication is required for platform administration",
            [],
        ));
    }

    if !ip_allowed(&state.platform_allowlist, ip) {
        return Err(AppError::forbidden(
            "IP_NOT_ALLOWED",
            "Platform administration is not allowed from this address",
            [],
        ));
    }

    Ok(())
}

pub async fn platform_admin_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or(AppError::Unauthorized)?;
    let ip = client_ip(
        request.headers(),
        request.extensions(),
        state.config.server.trust_proxy_headers,
    );

    if let Err(err) = check(&state, &user, ip).await {
        warn!(
            user_id = %user.user_id(),
            ip = ?ip,
            reason = err.error_label(),
            "Platform admin gate refused request"
        );
        let event = NewAuditEvent::new("platform.access", super::request_path(&request))
            .actor(user.user_id())
            .failure()
            .risk(RiskLevel::High)
            .metadata(json!({ "reason": err.error_label() }))
            .ip(ip.map(|ip| ip.to_string()));
        state.audit.record(event).await;
        return Err(err);
    }

    Ok(next.run(request).await)
}
