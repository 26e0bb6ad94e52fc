//! Billing webhook endpoint
//!
//! Subscription events from the billing provider. Authenticated by an HMAC
//! signature over the raw body rather than a user token.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};

use crate::{services::BillingOutcome, utils::AppResult, AppState};

/// Header carrying `sha256=<hex hmac>` of the body
pub const SIGNATURE_HEADER: &str = "x-billing-signature";

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/events", post(handle_billing_event))
}

/// POST /api/v1/billing/events
async fn handle_billing_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<BillingOutcome>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.billing.handle(&body, signature).await?;
    tracing::info!(?outcome, "Billing event processed");
    Ok(Json(outcome))
}
