//! Middleware components
//!
//! This module contains middleware for:
//! - Authentication (bearer header or session cookie, with CSRF)
//! - Route guards (organization scoping, roles, permissions, entitlements)
//! - The platform-operator gate
//! - Rate limiting

pub mod auth;
pub mod guard;
pub mod platform;
pub mod rate_limit;

pub use auth::{auth_middleware, AuthUser};
pub use guard::{guard_middleware, ActingOrganization, Guard};
pub use platform::platform_admin_middleware;
pub use rate_limit::{rate_limit_middleware, spawn_rate_limit_cleanup, ClientIp, RateLimitState};

use axum::extract::{OriginalUri, Request};

/// Full request path, including any prefix stripped by nested routers
pub(crate) fn request_path(request: &Request) -> String {
    request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}
