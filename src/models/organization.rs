//! Organization (tenant) model and subscription state

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subscription tier, ordered `trial < starter < professional < enterprise`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    Trial,
    Starter,
    Professional,
    Enterprise,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Trial => "trial",
            SubscriptionTier::Starter => "starter",
            SubscriptionTier::Professional => "professional",
            SubscriptionTier::Enterprise => "enterprise",
        }
    }

    /// Plan limits and default feature set applied when an organization moves to this tier
    pub fn plan(&self) -> PlanDefaults {
        let (max_residents, max_properties, features): (i64, i64, &[&str]) = match self {
            SubscriptionTier::Trial => (10, 2, &["incidents", "support_plans"]),
            SubscriptionTier::Starter => (25, 5, &["incidents", "support_plans", "invoicing"]),
            SubscriptionTier::Professional => (
                100,
                20,
                &["incidents", "support_plans", "invoicing", "reporting"],
            ),
            SubscriptionTier::Enterprise => (
                1000,
                200,
                &[
                    "incidents",
                    "support_plans",
                    "invoicing",
                    "reporting",
                    "government_billing",
                    "sso",
                    "audit_export",
                ],
            ),
        };

        PlanDefaults {
            max_residents,
            max_properties,
            features: features.iter().map(|f| (f.to_string(), true)).collect(),
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(SubscriptionTier::Trial),
            "starter" => Ok(SubscriptionTier::Starter),
            "professional" => Ok(SubscriptionTier::Professional),
            "enterprise" => Ok(SubscriptionTier::Enterprise),
            _ => Err(format!("Invalid subscription tier: {}", s)),
        }
    }
}

/// Limits and features that come with a tier
#[derive(Debug, Clone, PartialEq)]
pub struct PlanDefaults {
    pub max_residents: i64,
    pub max_properties: i64,
    pub features: BTreeMap<String, bool>,
}

/// Subscription status as stored on the organization row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trial,
    Active,
    PastDue,
    Cancelled,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trial => "trial",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Paused => "paused",
        }
    }

    /// Statuses that allow using subscription-gated routes
    pub fn is_usable(&self) -> bool {
        matches!(self, SubscriptionStatus::Trial | SubscriptionStatus::Active)
    }

    /// Transitions move forward only; `past_due -> active` (renewal) is the one way back.
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, next),
            (Trial, Active)
                | (Trial, PastDue)
                | (Trial, Cancelled)
                | (Trial, Paused)
                | (Active, PastDue)
                | (Active, Cancelled)
                | (Active, Paused)
                | (PastDue, Active)
                | (PastDue, Cancelled)
                | (PastDue, Paused)
                | (Paused, Cancelled)
        )
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(SubscriptionStatus::Trial),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "paused" => Ok(SubscriptionStatus::Paused),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// Resource kinds with plan ceilings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Residents,
    Properties,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Residents => "residents",
            ResourceKind::Properties => "properties",
        }
    }

    /// Error label used when the ceiling is reached
    pub fn limit_error(&self) -> &'static str {
        match self {
            ResourceKind::Residents => "Resident limit reached",
            ResourceKind::Properties => "Property limit reached",
        }
    }
}

/// Organization entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub subscription_tier: SubscriptionTier,
    pub subscription_status: SubscriptionStatus,
    pub features: BTreeMap<String, bool>,
    pub max_residents: i64,
    pub max_properties: i64,
    pub current_residents: i64,
    pub current_properties: i64,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
    pub billing_cycle_anchor: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an organization
#[derive(Debug, Clone)]
pub struct NewOrganization {
    pub name: String,
    pub subscription_tier: SubscriptionTier,
    pub subscription_status: SubscriptionStatus,
    /// Overrides the tier's default features when set
    pub features: Option<BTreeMap<String, bool>>,
    /// Overrides the tier's default limits when set
    pub max_residents: Option<i64>,
    pub max_properties: Option<i64>,
    pub trial_end_date: Option<DateTime<Utc>>,
    pub subscription_end_date: Option<DateTime<Utc>>,
}

impl NewOrganization {
    pub fn new(name: impl Into<String>, tier: SubscriptionTier, status: SubscriptionStatus) -> Self {
        Self {
            name: name.into(),
            subscription_tier: tier,
            subscription_status: status,
            features: None,
            max_residents: None,
            max_properties: None,
            trial_end_date: None,
            subscription_end_date: None,
        }
    }
}
