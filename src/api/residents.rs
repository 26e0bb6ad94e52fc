//! Resident and property endpoints
//!
//! Thin record endpoints used to exercise tenant scoping, quota gates and
//! per-role field projection. Every query is scoped by the acting organization.

use axum::{
    extract::{OriginalUri, Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::ResidentRepository,
    guard,
    middleware::{ActingOrganization, AuthUser, ClientIp, Guard},
    models::{
        CreatePropertyRequest, CreateResidentRequest, NewAuditEvent, Permission, Property,
        ResourceClass, ResourceKind, RiskLevel,
    },
    services::{project_resident, ResidentView},
    utils::{AppError, AppResult},
    AppState,
};

/// Resident routes, mounted at `/residents` and `/organizations/{organization_id}/residents`
pub fn resident_routes(state: &AppState) -> Router<AppState> {
    let read = Guard::new()
        .permission(Permission::ResidentsRead)
        .active_subscription()
        .audit_access(ResourceClass::ResidentSensitive)
        .audit_access(ResourceClass::Financial);
    let write = Guard::new()
        .permission(Permission::ResidentsWrite)
        .active_subscription()
        .quota(ResourceKind::Residents);

    Router::new()
        .route(
            "/",
            get(list_residents)
                .route_layer(guard!(state, read.clone()))
                .merge(axum::routing::post(create_resident).route_layer(guard!(state, write))),
        )
        .route(
            "/{id}",
            get(get_resident).route_layer(guard!(state, read)),
        )
}

/// Property routes, mounted at `/properties` and `/organizations/{organization_id}/properties`
pub fn property_routes(state: &AppState) -> Router<AppState> {
    let read = Guard::new()
        .permission(Permission::PropertiesRead)
        .active_subscription();
    let write = Guard::new()
        .permission(Permission::PropertiesWrite)
        .active_subscription()
        .quota(ResourceKind::Properties);

    Router::new().route(
        "/",
        get(list_properties)
            .route_layer(guard!(state, read))
            .merge(axum::routing::post(create_property).route_layer(guard!(state, write))),
    )
}

/// Rejection used when the conditional counter update lost a race for the last
/// slot; audited like a quota-gate denial
async fn quota_exhausted(
    state: &AppState,
    acting: &ActingOrganization,
    caller: &AuthUser,
    ip: &ClientIp,
    uri: &OriginalUri,
    kind: ResourceKind,
) -> AppError {
    let err = match state.entitlements.current_entitlements(acting.organization_id).await {
        Ok(entitlements) => {
            let (current, max) = entitlements.quota(kind);
            AppError::forbidden(
                kind.limit_error(),
                format!("Your plan allows {} {}", max, kind.as_str()),
                [("currentCount", json!(current)), ("maxAllowed", json!(max))],
            )
        }
        Err(e) => return e,
    };

    state
        .audit
        .record(
            NewAuditEvent::new("authz.denied", uri.path())
                .actor(caller.user_id())
                .organization(Some(acting.organization_id))
                .failure()
                .risk(RiskLevel::Medium)
                .metadata(json!({ "reason": err.error_label(), "method": "POST" }))
                .ip(ip.for_audit()),
        )
        .await;
    err
}

/// GET /residents
async fn list_residents(
    State(state): State<AppState>,
    acting: ActingOrganization,
) -> AppResult<Json<Vec<ResidentView>>> {
    let residents = ResidentRepository::new(&state.db)
        .list(acting.organization_id)
        .await?;
    Ok(Json(
        residents
            .iter()
            .map(|r| project_resident(r, acting.role))
            .collect(),
    ))
}

/// GET /residents/{id}
async fn get_resident(
    State(state): State<AppState>,
    acting: ActingOrganization,
    Path(params): Path<Vec<(String, String)>>,
) -> AppResult<Json<ResidentView>> {
    let id = params
        .iter()
        .find(|(key, _)| key == "id")
        .and_then(|(_, value)| Uuid::parse_str(value).ok())
        .ok_or_else(|| AppError::BadRequest("Invalid resident id".to_string()))?;

    let resident = ResidentRepository::new(&state.db)
        .get(acting.organization_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Resident not found".to_string()))?;
    Ok(Json(project_resident(&resident, acting.role)))
}

/// POST /residents
async fn create_resident(
    State(state): State<AppState>,
    acting: ActingOrganization,
    caller: AuthUser,
    ip: ClientIp,
    uri: OriginalUri,
    Json(payload): Json<CreateResidentRequest>,
) -> AppResult<(StatusCode, Json<ResidentView>)> {
    payload.validate()?;

    match ResidentRepository::new(&state.db)
        .create(acting.organization_id, &payload)
        .await?
    {
        Some(resident) => Ok((
            StatusCode::CREATED,
            Json(project_resident(&resident, acting.role)),
        )),
        None => Err(quota_exhausted(&state, &acting, &caller, &ip, &uri, ResourceKind::Residents).await),
    }
}

/// GET /properties
async fn list_properties(
    State(state): State<AppState>,
    acting: ActingOrganization,
) -> AppResult<Json<Vec<Property>>> {
    Ok(Json(
        ResidentRepository::new(&state.db)
            .list_properties(acting.organization_id)
            .await?,
    ))
}

/// POST /properties
async fn create_property(
    State(state): State<AppState>,
    acting: ActingOrganization,
    caller: AuthUser,
    ip: ClientIp,
    uri: OriginalUri,
    Json(payload): Json<CreatePropertyRequest>,
) -> AppResult<(StatusCode, Json<Property>)> {
    payload.validate()?;

    match ResidentRepository::new(&state.db)
        .create_property(acting.organization_id, &payload)
        .await?
    {
        Some(property) => Ok((StatusCode::CREATED, Json(property))),
        None => Err(quota_exhausted(&state, &acting, &caller, &ip, &uri, ResourceKind::Properties).await),
    }
}
