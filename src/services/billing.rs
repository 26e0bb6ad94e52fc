//! Billing collaborator events
//!
//! The payment provider's own process decides what happened; this module only
//! verifies the signed notification and moves the organization through the
//! subscription state machine with a compare-and-set on the stored status.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tracing::info;
use uuid::Uuid;
use validator::Validate;

use crate::db::{BillingRepository, DbPool, OrganizationRepository};
use crate::models::{NewAuditEvent, RiskLevel, SubscriptionStatus, SubscriptionTier};
use crate::services::AuditLedger;
use crate::utils::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingEventType {
    Activated,
    PaymentFailed,
    PaymentSucceeded,
    Cancelled,
    Paused,
    TierChanged,
}

impl BillingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingEventType::Activated => "activated",
            BillingEventType::PaymentFailed => "payment_failed",
            BillingEventType::PaymentSucceeded => "payment_succeeded",
            BillingEventType::Cancelled => "cancelled",
            BillingEventType::Paused => "paused",
            BillingEventType::TierChanged => "tier_changed",
        }
    }

    /// Status this event moves the subscription to; `None` for tier changes
    pub fn target_status(&self) -> Option<SubscriptionStatus> {
        match self {
            BillingEventType::Activated | BillingEventType::PaymentSucceeded => {
                Some(SubscriptionStatus::Active)
            }
            BillingEventType::PaymentFailed => Some(SubscriptionStatus::PastDue),
            BillingEventType::Cancelled => Some(SubscriptionStatus::Cancelled),
            BillingEventType::Paused => Some(SubscriptionStatus::Paused),
            BillingEventType::TierChanged => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BillingEvent {
    #[validate(length(min = 1, max = 200))]
    pub event_id: String,
    pub organization_id: Uuid,
    #[serde(rename = "type")]
    pub event_type: BillingEventType,
    /// Required for `tier_changed`
    pub tier: Option<SubscriptionTier>,
    /// New end of the paid period, if the provider sent one
    pub period_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "result")]
pub enum BillingOutcome {
    Applied {
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },
    TierChanged {
        tier: SubscriptionTier,
    },
    /// Same-status renewal; only the period end moved
    Renewed,
    Duplicate,
}

/// Check `sha256=<hex>` against an HMAC of the raw body
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    let Some(hex_sig) = header.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Signature header value for a body; used by the provider side and tests
pub fn sign(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid billing secret: {}", e)))?;
    mac.update(body);
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(mac.finalize().into_bytes())))
}

pub struct BillingService {
    pool: DbPool,
    audit: Arc<AuditLedger>,
    webhook_secret: Option<String>,
}

impl BillingService {
    pub fn new(pool: DbPool, audit: Arc<AuditLedger>, webhook_secret: Option<String>) -> Self {
        Self {
            pool,
            audit,
            webhook_secret,
        }
    }

    /// Verify and apply one signed event.
    ///
    /// The event id is recorded in the same transaction as the change, so a
    /// redelivery is answered with `Duplicate` and never applied twice.
    pub async fn handle(&self, body: &[u8], signature: Option<&str>) -> AppResult<BillingOutcome> {
        let Some(secret) = self.webhook_secret.as_deref() else {
            return Err(AppError::Unauthorized);
        };
        if !signature.is_some_and(|sig| verify_signature(secret, body, sig)) {
            self.audit
                .record(
                    NewAuditEvent::new("billing.event", "billing")
                        .failure()
                        .risk(RiskLevel::High)
                        .metadata(json!({ "reason": "bad_signature" })),
                )
                .await;
            return Err(AppError::Unauthorized);
        }

        let event: BillingEvent = serde_json::from_slice(body)?;
        event.validate()?;
        self.apply(&event).await
    }

    pub async fn apply(&self, event: &BillingEvent) -> AppResult<BillingOutcome> {
        let orgs = OrganizationRepository::new(&self.pool);
        let org = orgs
            .get_by_id(event.organization_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Organization not found".to_string()))?;
        let current = org.subscription_status;

        // validate before recording so a rejected event can be corrected and resent
        let plan = match event.event_type.target_status() {
            Some(target) if target == current => None,
            Some(target) if current.can_transition_to(target) => Some(target),
            Some(target) => {
                return Err(AppError::BadRequest(format!(
                    "Invalid subscription transition: {} -> {}",
                    current.as_str(),
                    target.as_str()
                )))
            }
            None => {
                if event.tier.is_none() {
                    return Err(AppError::BadRequest("tier_changed requires a tier".to_string()));
                }
                None
            }
        };

        // the event id and the change commit together; a lost compare-and-set
        // rolls both back so the provider's redelivery is applied
        let mut tx = self.pool.begin().await?;
        if !BillingRepository::mark_processed(
            &mut tx,
            &event.event_id,
            event.organization_id,
            event.event_type.as_str(),
        )
        .await?
        {
            return Ok(BillingOutcome::Duplicate);
        }

        let (applied, outcome) = match (event.event_type, event.tier, plan) {
            (BillingEventType::TierChanged, Some(tier), _) => (
                OrganizationRepository::change_tier(&mut tx, org.id, tier, current).await?,
                BillingOutcome::TierChanged { tier },
            ),
            (_, _, Some(target)) => (
                OrganizationRepository::transition_status_with(
                    &mut *tx,
                    org.id,
                    current,
                    target,
                    event.period_end,
                )
                .await?,
                BillingOutcome::Applied { from: current, to: target },
            ),
            _ => (
                OrganizationRepository::transition_status_with(
                    &mut *tx,
                    org.id,
                    current,
                    current,
                    event.period_end,
                )
                .await?,
                BillingOutcome::Renewed,
            ),
        };
        if !applied {
            return Err(concurrent_change());
        }
        tx.commit().await?;

        info!(
            organization_id = %org.id,
            event_type = event.event_type.as_str(),
            "Applied billing event"
        );
        self.audit
            .record(
                NewAuditEvent::new("billing.event", format!("organization:{}", org.id))
                    .organization(Some(org.id))
                    .risk(RiskLevel::Medium)
                    .metadata(json!({
                        "eventId": event.event_id,
                        "type": event.event_type.as_str(),
                        "outcome": outcome,
                    })),
            )
            .await;

        Ok(outcome)
    }
}

fn concurrent_change() -> AppError {
    AppError::BadRequest("Subscription changed concurrently; event not applied".to_string())
}
