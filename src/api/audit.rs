//! Audit log API endpoints
//!
//! Tenant administrators read their own organization's events. The
//! cross-tenant view and chain verification live under the platform console.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};

use crate::{
    guard,
    middleware::{ActingOrganization, Guard},
    models::{AuditEvent, AuditLogQuery, Permission, Role},
    utils::AppResult,
    AppState,
};

/// GET /organizations/{organization_id}/audit
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new().route(
        "/",
        get(list_organization_events).route_layer(guard!(
            state,
            Guard::new()
                .roles(&[Role::Admin, Role::Owner])
                .permission(Permission::AuditRead)
        )),
    )
}

async fn list_organization_events(
    State(state): State<AppState>,
    acting: ActingOrganization,
    Query(mut query): Query<AuditLogQuery>,
) -> AppResult<Json<Vec<AuditEvent>>> {
    query.organization_id = Some(acting.organization_id);
    Ok(Json(state.audit.list(&query).await?))
}
