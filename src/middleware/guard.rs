//! Route guards
//!
//! A [`Guard`] lists what a route needs from the caller. The middleware runs
//! the checks in a fixed order and stops at the first failure:
//!
//! 1. organization scoping (explicit `organization_id` must be one of the
//!    caller's memberships, otherwise the primary organization is used)
//! 2. role allow-list and/or minimum seniority, against the role held in that
//!    organization
//! 3. permission
//! 4. feature flag and minimum tier
//! 5. active subscription, on routes that ask for it
//! 6. usage quota (live counters)
//!
//! Every rejection is audited. Successful responses on routes marked with a
//! sensitive resource class are audited after the handler runs.

use axum::{
    extract::{FromRequestParts, Query, RawPathParams, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::{
    middleware::{auth::AuthUser, rate_limit::client_ip},
    models::{
        NewAuditEvent, OrganizationScopeQuery, Permission, ResourceClass, ResourceKind, RiskLevel,
        Role, SubscriptionTier,
    },
    services::{
        rbac::{has_permission, role_allowed, role_at_least},
        Entitlements,
    },
    utils::{AppError, AppResult},
    AppState,
};

/// Path parameter naming the organization a route acts on
pub const ORGANIZATION_PARAM: &str = "organization_id";

/// Requirements for one route
#[derive(Debug, Clone, Default)]
pub struct Guard {
    roles: Vec<Role>,
    min_role: Option<Role>,
    permission: Option<Permission>,
    active_subscription: bool,
    feature: Option<&'static str>,
    tier: Option<SubscriptionTier>,
    quota: Option<ResourceKind>,
    audit_access: Vec<ResourceClass>,
}

impl Guard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Caller's role must be one of `roles`
    pub fn roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    /// Caller's role must be at least `role` in seniority
    pub fn min_role(mut self, role: Role) -> Self {
        self.min_role = Some(role);
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    pub fn active_subscription(mut self) -> Self {
        self.active_subscription = true;
        self
    }

    pub fn feature(mut self, name: &'static str) -> Self {
        self.feature = Some(name);
        self
    }

    pub fn tier(mut self, tier: SubscriptionTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn quota(mut self, kind: ResourceKind) -> Self {
        self.quota = Some(kind);
        self
    }

    /// Audit successful responses that expose this resource class to the caller
    pub fn audit_access(mut self, class: ResourceClass) -> Self {
        if !self.audit_access.contains(&class) {
            self.audit_access.push(class);
        }
        self
    }

    /// Audited classes the role actually gets to read
    fn exposed_classes(&self, role: Role) -> Vec<ResourceClass> {
        self.audit_access
            .iter()
            .copied()
            .filter(|class| class.is_audited() && has_permission(role, class.read_permission()))
            .collect()
    }

    fn needs_entitlements(&self) -> bool {
        self.active_subscription
            || self.feature.is_some()
            || self.tier.is_some()
            || self.quota.is_some()
    }
}

/// Organization a guarded request acts on, attached by the guard middleware
#[derive(Debug, Clone)]
pub struct ActingOrganization {
    pub organization_id: Uuid,
    /// Caller's role in this organization
    pub role: Role,
    /// Fetched once per request when a subscription gate needed them
    pub entitlements: Option<Entitlements>,
}

impl<S> FromRequestParts<S> for ActingOrganization
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ActingOrganization>()
            .cloned()
            .ok_or_else(no_organization_context)
    }
}

fn no_organization_context() -> AppError {
    AppError::forbidden(
        "NO_ORGANIZATION_CONTEXT",
        "This request needs an organization context",
        [],
    )
}

/// Organization explicitly named by the request, from the path or `?organizationId=`
async fn requested_organization(parts: &mut Parts, state: &AppState) -> AppResult<Option<Uuid>> {
    if let Ok(params) = RawPathParams::from_request_parts(parts, state).await {
        if let Some((_, value)) = params.iter().find(|(key, _)| *key == ORGANIZATION_PARAM) {
            return Uuid::parse_str(value)
                .map(Some)
                .map_err(|_| AppError::BadRequest("Invalid organization id".to_string()));
        }
    }

    match Query::<OrganizationScopeQuery>::try_from_uri(&parts.uri) {
        Ok(Query(query)) => Ok(query.organization_id),
        Err(_) => Err(AppError::BadRequest("Invalid organizationId".to_string())),
    }
}

/// Run the checks; on success the acting organization for the handler
async fn evaluate(
    state: &AppState,
    guard: &Guard,
    user: &AuthUser,
    requested: Option<Uuid>,
) -> AppResult<ActingOrganization> {
    let claims = &user.claims;

    let organization_id = match requested.or(claims.primary_organization_id) {
        Some(id) => id,
        None => return Err(no_organization_context()),
    };
    let membership = claims
        .organizations
        .iter()
        .find(|o| o.organization_id == organization_id)
        .ok_or_else(|| {
            AppError::forbidden(
                "ORGANIZATION_ACCESS_DENIED",
                "You are not a member of this organization",
                [("organizationId", json!(organization_id))],
            )
        })?;
    let role = membership.role;

    if !guard.roles.is_empty() && !role_allowed(role, &guard.roles) {
        return Err(AppError::forbidden(
            "INSUFFICIENT_ROLE",
            "Your role does not allow this action",
            [
                ("requiredRoles", json!(guard.roles)),
                ("currentRole", json!(role)),
            ],
        ));
    }
    if let Some(min_role) = guard.min_role {
        if !role_at_least(role, min_role) {
            return Err(AppError::forbidden(
                "INSUFFICIENT_ROLE",
                format!("This action requires the {} role or higher", min_role),
                [
                    ("requiredRole", json!(min_role)),
                    ("currentRole", json!(role)),
                ],
            ));
        }
    }

    if let Some(permission) = guard.permission {
        if !has_permission(role, permission) {
            return Err(AppError::forbidden(
                "PERMISSION_DENIED",
                format!("Missing permission {}", permission.as_str()),
                [("requiredPermission", json!(permission.as_str()))],
            ));
        }
    }

    if !guard.needs_entitlements() {
        return Ok(ActingOrganization {
            organization_id,
            role,
            entitlements: None,
        });
    }

    let entitlements = state
        .entitlements
        .current_entitlements(organization_id)
        .await?;

    if let Some(feature) = guard.feature {
        if !entitlements.has_feature(feature) {
            return Err(AppError::forbidden(
                "FEATURE_NOT_AVAILABLE",
                format!("Your plan does not include {}", feature),
                [("featureName", json!(feature))],
            ));
        }
    }

    if let Some(tier) = guard.tier {
        if !entitlements.meets_tier(tier) {
            return Err(AppError::forbidden(
                "TIER_REQUIRED",
                format!("This feature requires the {} plan or higher", tier),
                [
                    ("requiredTier", json!(tier)),
                    ("currentTier", json!(entitlements.tier)),
                ],
            ));
        }
    }

    if guard.active_subscription && !entitlements.is_active() {
        return Err(AppError::forbidden(
            "SUBSCRIPTION_INACTIVE",
            "An active subscription is required",
            [("subscriptionStatus", json!(entitlements.status))],
        ));
    }

    if let Some(kind) = guard.quota {
        if !entitlements.within_quota(kind) {
            let (current, max) = entitlements.quota(kind);
            return Err(AppError::forbidden(
                kind.limit_error(),
                format!("Your plan allows {} {}", max, kind.as_str()),
                [("currentCount", json!(current)), ("maxAllowed", json!(max))],
            ));
        }
    }

    Ok(ActingOrganization {
        organization_id,
        role,
        entitlements: Some(entitlements),
    })
}

/// Guard middleware
///
/// Usage:
/// ```ignore
/// Router::new()
///     .route("/reports/occupancy", get(occupancy))
///     .route_layer(guard!(state, Guard::new().feature("reporting")));
/// ```
pub async fn guard_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
    guard: Guard,
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
    )
    .map(|ip| ip.to_string());
    let path = super::request_path(&request);
    let method = request.method().as_str().to_string();

    let (mut parts, body) = request.into_parts();
    let decision = match requested_organization(&mut parts, &state).await {
        Ok(requested) => evaluate(&state, &guard, &user, requested)
            .await
            .map_err(|err| (err, requested)),
        Err(err) => Err((err, None)),
    };

    let acting = match decision {
        Ok(acting) => acting,
        Err((err, requested)) => {
            let risk = if err.error_label() == "ORGANIZATION_ACCESS_DENIED" {
                RiskLevel::High
            } else {
                RiskLevel::Medium
            };
            state
                .audit
                .record(
                    NewAuditEvent::new("authz.denied", path)
                        .actor(user.user_id())
                        .organization(requested.or(user.claims.primary_organization_id))
                        .failure()
                        .risk(risk)
                        .metadata(json!({ "reason": err.error_label(), "method": method }))
                        .ip(ip),
                )
                .await;
            return Err(err);
        }
    };

    debug!(
        user_id = %user.user_id(),
        organization_id = %acting.organization_id,
        role = %acting.role,
        "Guard passed"
    );

    let organization_id = acting.organization_id;
    let role = acting.role;
    let mut request = Request::from_parts(parts, body);
    request.extensions_mut().insert(acting);
    let response = next.run(request).await;

    let exposed = guard.exposed_classes(role);
    if !exposed.is_empty() && response.status().is_success() {
        let risk = if exposed.contains(&ResourceClass::Financial) {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };
        let classes: Vec<&str> = exposed.iter().map(|c| c.as_str()).collect();
        state
            .audit
            .record(
                NewAuditEvent::new("resource.access", path)
                    .actor(user.user_id())
                    .organization(Some(organization_id))
                    .risk(risk)
                    .metadata(json!({ "classes": classes, "method": method }))
                    .ip(ip),
            )
            .await;
    }

    Ok(response)
}

/// Create a middleware layer that enforces a [`Guard`]
#[macro_export]
macro_rules! guard {
    ($state:expr, $guard:expr) => {{
        let guard: $crate::middleware::guard::Guard = $guard;
        axum::middleware::from_fn_with_state($state.clone(), move |state, req, next| {
            $crate::middleware::guard::guard_middleware(state, req, next, guard.clone())
        })
    }};
}
