//! Report endpoints
//!
//! Occupancy is part of the `reporting` feature; funding claims are an
//! enterprise report restricted to managers and above.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::ResidentRepository,
    guard,
    middleware::{ActingOrganization, Guard},
    models::{Permission, ResourceClass, Role, SubscriptionTier},
    utils::AppResult,
    AppState,
};

pub fn routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/occupancy",
            get(occupancy).route_layer(guard!(
                state,
                Guard::new()
                    .permission(Permission::ReportsRead)
                    .feature("reporting")
                    .active_subscription()
            )),
        )
        .route(
            "/funding-claims",
            get(funding_claims).route_layer(guard!(
                state,
                Guard::new()
                    .min_role(Role::Manager)
                    .tier(SubscriptionTier::Enterprise)
                    .active_subscription()
                    .audit_access(ResourceClass::Financial)
            )),
        )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccupancyReport {
    pub organization_id: Uuid,
    pub residents: i64,
    pub max_residents: i64,
    pub properties: i64,
    pub max_properties: i64,
    /// Residents as a percentage of the plan ceiling
    pub utilisation_percent: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingClaimsReport {
    pub organization_id: Uuid,
    pub claimants: usize,
    pub total_arrears_pence: i64,
    pub claims: Vec<FundingClaim>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingClaim {
    pub resident_id: Uuid,
    pub benefit_reference: String,
    pub rent_arrears_pence: i64,
}

fn utilisation(used: i64, max: i64) -> f64 {
    if max <= 0 {
        return 0.0;
    }
    (used as f64 / max as f64 * 1000.0).round() / 10.0
}

/// GET /reports/occupancy
async fn occupancy(
    State(state): State<AppState>,
    acting: ActingOrganization,
) -> AppResult<Json<OccupancyReport>> {
    let entitlements = match acting.entitlements {
        Some(entitlements) => entitlements,
        None => {
            state
                .entitlements
                .current_entitlements(acting.organization_id)
                .await?
        }
    };

    Ok(Json(OccupancyReport {
        organization_id: acting.organization_id,
        residents: entitlements.usage.residents,
        max_residents: entitlements.limits.max_residents,
        properties: entitlements.usage.properties,
        max_properties: entitlements.limits.max_properties,
        utilisation_percent: utilisation(
            entitlements.usage.residents,
            entitlements.limits.max_residents,
        ),
    }))
}

/// GET /reports/funding-claims
async fn funding_claims(
    State(state): State<AppState>,
    acting: ActingOrganization,
) -> AppResult<Json<FundingClaimsReport>> {
    let residents = ResidentRepository::new(&state.db)
        .list(acting.organization_id)
        .await?;

    let claims: Vec<FundingClaim> = residents
        .into_iter()
        .filter_map(|r| {
            r.benefit_reference.map(|benefit_reference| FundingClaim {
                resident_id: r.id,
                benefit_reference,
                rent_arrears_pence: r.rent_arrears_pence.unwrap_or(0),
            })
        })
        .collect();

    Ok(Json(FundingClaimsReport {
        organization_id: acting.organization_id,
        claimants: claims.len(),
        total_arrears_pence: claims.iter().map(|c| c.rent_arrears_pence).sum(),
        claims,
    }))
}
