//! API routes and handlers
//!
//! This module defines all API endpoints and their routing.

use axum::{middleware::from_fn_with_state, routing::get, Router};

use crate::{
    middleware::{auth_middleware, platform_admin_middleware, rate_limit_middleware},
    AppState,
};

mod audit;
mod auth;
mod billing;
mod entitlements;
mod health;
mod platform;
mod reports;
mod residents;

pub use billing::SIGNATURE_HEADER;
pub use health::*;

/// Prefix for tenant routes that name their organization explicitly
const ORGANIZATION_SCOPE: &str = "/organizations/{organization_id}";

/// Public API routes (no authentication required)
pub fn public_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        // Health check endpoints
        .route("/health", get(health::health_check))
        .route("/health/detailed", get(health::health_check_detailed))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // Authentication endpoints (no auth required)
        .nest("/auth", auth::public_routes(state))
        // Billing provider webhooks (signature verification instead of auth)
        .nest("/billing", billing::webhook_routes())
}

/// Tenant routes, reachable with the primary organization or an explicit one
fn tenant_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .nest("/entitlements", entitlements::routes(state))
        .nest("/residents", residents::resident_routes(state))
        .nest("/properties", residents::property_routes(state))
        .nest("/reports", reports::routes(state))
}

/// Protected API routes (authentication required)
pub fn protected_routes(state: &AppState) -> Router<AppState> {
    let platform = platform::routes().layer(from_fn_with_state(
        state.clone(),
        platform_admin_middleware,
    ));

    Router::new()
        // Protected auth endpoints (me, MFA enrollment)
        .nest("/auth", auth::protected_routes())
        .merge(tenant_routes(state))
        .nest(ORGANIZATION_SCOPE, tenant_routes(state))
        .nest(
            &format!("{}/audit", ORGANIZATION_SCOPE),
            audit::routes(state),
        )
        // Platform operator console
        .nest("/platform-admin", platform)
}

/// Full router under `/api/v1`, with authentication and the general rate limit
/// applied to protected routes
pub fn router(state: AppState) -> Router {
    let protected = protected_routes(&state)
        .layer(from_fn_with_state(state.clone(), auth_middleware))
        .layer(from_fn_with_state(
            state.api_rate_limit.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .nest("/api/v1", public_routes(&state).merge(protected))
        .with_state(state)
}
