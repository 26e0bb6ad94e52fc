//! Platform-operator console endpoints
//!
//! Mounted at `/platform-admin` behind the platform gate (role, MFA and IP
//! allow-list). These are the only cross-tenant reads and writes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::{
    middleware::{AuthUser, ClientIp},
    models::{AuditEvent, AuditLogQuery, ChainVerification},
    services::{EmergencyAction, EmergencyAuthorization, PlatformOverview},
    utils::AppResult,
    AppState,
};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/overview", get(overview))
        .route("/organizations/{id}/disable", post(disable_organization))
        .route("/users/{id}/force-password-reset", post(force_password_reset))
        .route("/emergency/authorize", post(authorize_emergency))
        .route("/audit", get(list_audit_events))
        .route("/audit/verify", get(verify_audit_chain))
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct EmergencyReason {
    #[validate(length(min = 1, max = 1000))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmergencyActionKind {
    DisableOrganization,
    ForcePasswordReset,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeEmergencyRequest {
    pub action: EmergencyActionKind,
    pub target_id: Uuid,
}

impl AuthorizeEmergencyRequest {
    fn action(&self) -> EmergencyAction {
        match self.action {
            EmergencyActionKind::DisableOrganization => {
                EmergencyAction::DisableOrganization(self.target_id)
            }
            EmergencyActionKind::ForcePasswordReset => {
                EmergencyAction::ForcePasswordReset(self.target_id)
            }
        }
    }
}

/// GET /platform-admin/overview
async fn overview(State(state): State<AppState>) -> AppResult<Json<PlatformOverview>> {
    Ok(Json(state.platform.overview().await?))
}

/// POST /platform-admin/organizations/{id}/disable
async fn disable_organization(
    State(state): State<AppState>,
    user: AuthUser,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    Json(payload): Json<EmergencyReason>,
) -> AppResult<Json<EmergencyAuthorization>> {
    payload.validate()?;
    let decision = state
        .platform
        .disable_organization(&user.claims, id, payload.reason, ip.for_audit())
        .await?;
    Ok(Json(decision))
}

/// POST /platform-admin/users/{id}/force-password-reset
async fn force_password_reset(
    State(state): State<AppState>,
    user: AuthUser,
    ip: ClientIp,
    Path(id): Path<Uuid>,
    Json(payload): Json<EmergencyReason>,
) -> AppResult<Json<EmergencyAuthorization>> {
    payload.validate()?;
    let decision = state
        .platform
        .force_password_reset(&user.claims, id, payload.reason, ip.for_audit())
        .await?;
    Ok(Json(decision))
}

/// POST /platform-admin/emergency/authorize
///
/// Dry run: reports whether the action would be allowed without performing it.
async fn authorize_emergency(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AuthorizeEmergencyRequest>,
) -> AppResult<Json<EmergencyAuthorization>> {
    let decision = state
        .platform
        .authorize_emergency(&user.claims, payload.action())
        .await?;
    Ok(Json(decision))
}

/// GET /platform-admin/audit
async fn list_audit_events(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> AppResult<Json<Vec<AuditEvent>>> {
    Ok(Json(state.audit.list(&query).await?))
}

/// GET /platform-admin/audit/verify
async fn verify_audit_chain(State(state): State<AppState>) -> AppResult<Json<ChainVerification>> {
    Ok(Json(state.audit.verify_chain().await?))
}
