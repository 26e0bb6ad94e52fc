//! Entitlement endpoints
//!
//! "What can I do" reads for the UI: tier, effective status, features, limits
//! and usage of the acting organization.

use axum::{extract::State, routing::get, Json, Router};

use crate::{
    guard,
    middleware::{ActingOrganization, Guard},
    services::Entitlements,
    utils::AppResult,
    AppState,
};

/// GET /entitlements and GET /organizations/{organization_id}/entitlements
pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/", get(current_entitlements))
        .route_layer(guard!(state, Guard::new()))
}

async fn current_entitlements(
    State(state): State<AppState>,
    acting: ActingOrganization,
) -> AppResult<Json<Entitlements>> {
    let entitlements = state
        .entitlements
        .current_entitlements(acting.organization_id)
        .await?;
    Ok(Json(entitlements))
}
