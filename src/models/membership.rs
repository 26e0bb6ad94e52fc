//! User-organization membership model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Invited,
    Suspended,
}

impl MembershipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Invited => "invited",
            MembershipStatus::Suspended => "suspended",
        }
    }
}

impl std::str::FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MembershipStatus::Active),
            "invited" => Ok(MembershipStatus::Invited),
            "suspended" => Ok(MembershipStatus::Suspended),
            _ => Err(format!("Invalid membership status: {}", s)),
        }
    }
}

/// A user's membership in one organization, joined with the organization name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub organization_name: String,
    pub role: Role,
    pub is_primary: bool,
    pub status: MembershipStatus,
    pub created_at: DateTime<Utc>,
}

/// Input for linking a user to an organization
#[derive(Debug, Clone)]
pub struct NewMembership {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub role: Role,
    pub is_primary: bool,
    pub status: MembershipStatus,
}
