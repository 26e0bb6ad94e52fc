//! Subscription entitlement engine
//!
//! `current_entitlements` is the only I/O; every check on the result is a pure
//! function. Time-based expiry is evaluated here instead of waiting for the
//! billing collaborator to rewrite the row.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{DbPool, OrganizationRepository};
use crate::models::{Organization, ResourceKind, SubscriptionStatus, SubscriptionTier};
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLimits {
    pub max_residents: i64,
    pub max_properties: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub residents: i64,
    pub properties: i64,
}

/// Effective subscription state for one organization
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlements {
    pub organization_id: Uuid,
    pub tier: SubscriptionTier,
    /// Status after lazy expiry
    pub status: SubscriptionStatus,
    pub features: BTreeMap<String, bool>,
    pub limits: UsageLimits,
    pub usage: Usage,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
}

impl Entitlements {
    /// Derive entitlements from a stored organization row at time `now`
    pub fn evaluate(org: &Organization, now: DateTime<Utc>) -> Self {
        let trial_over = org.subscription_status == SubscriptionStatus::Trial
            && org.trial_end_date.is_some_and(|end| end < now);
        let period_over = org.subscription_end_date.is_some_and(|end| end < now);

        let status = if trial_over || period_over {
            SubscriptionStatus::Cancelled
        } else {
            org.subscription_status
        };

        Self {
            organization_id: org.id,
            tier: org.subscription_tier,
            status,
            features: org.features.clone(),
            limits: UsageLimits {
                max_residents: org.max_residents,
                max_properties: org.max_properties,
            },
            usage: Usage {
                residents: org.current_residents,
                properties: org.current_properties,
            },
            trial_end_date: org.trial_end_date,
            subscription_end_date: org.subscription_end_date,
        }
    }

    /// Exact-match lookup; a missing key is `false`
    pub fn has_feature(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    pub fn meets_tier(&self, min_tier: SubscriptionTier) -> bool {
        self.tier >= min_tier
    }

    pub fn within_quota(&self, kind: ResourceKind) -> bool {
        let (current, max) = self.quota(kind);
        current < max
    }

    /// `(current, max)` for a resource kind
    pub fn quota(&self, kind: ResourceKind) -> (i64, i64) {
        match kind {
            ResourceKind::Residents => (self.usage.residents, self.limits.max_residents),
            ResourceKind::Properties => (self.usage.properties, self.limits.max_properties),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_usable()
    }
}

pub struct EntitlementService {
    pool: DbPool,
}

impl EntitlementService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Single read of organization state, evaluated at the current time
    pub async fn current_entitlements(&self, organization_id: Uuid) -> AppResult<Entitlements> {
        let org = OrganizationRepository::new(&self.pool)
            .get_by_id(organization_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Organization not found".to_string()))?;
        Ok(Entitlements::evaluate(&org, Utc::now()))
    }
}
