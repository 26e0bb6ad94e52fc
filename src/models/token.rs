//! Token payloads and the tenant context they carry

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Role, SubscriptionStatus, SubscriptionTier};

/// Token type discriminator stored in every token's `type` claim
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
    MfaChallenge,
}

/// One membership as embedded in an access token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationClaim {
    pub organization_id: Uuid,
    pub organization_name: String,
    pub role: Role,
    pub is_primary: bool,
}

/// Claim bundle assembled by the tenant resolver.
///
/// Platform operators carry no organization: `primary_organization_id` and the
/// subscription fields are `None` and `organizations` is empty.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub mfa_enabled: bool,
    pub primary_organization_id: Option<Uuid>,
    pub organization_name: Option<String>,
    pub subscription_tier: Option<SubscriptionTier>,
    pub subscription_status: Option<SubscriptionStatus>,
    pub features: BTreeMap<String, bool>,
    pub organizations: Vec<OrganizationClaim>,
}

impl TenantContext {
    /// Membership for the given organization, if the user holds one
    pub fn membership(&self, organization_id: Uuid) -> Option<&OrganizationClaim> {
        self.organizations
            .iter()
            .find(|o| o.organization_id == organization_id)
    }
}

/// Access token claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    pub user_id: Uuid,
    pub email: String,
    /// Role within the primary organization, or `platform_admin`
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_organization_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_tier: Option<SubscriptionTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<SubscriptionStatus>,
    #[serde(default)]
    pub features: BTreeMap<String, bool>,
    #[serde(default)]
    pub organizations: Vec<OrganizationClaim>,
    /// Same value as `primaryOrganizationId`; kept for clients that scope by tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub mfa_enabled: bool,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

impl Claims {
    pub fn context(&self) -> TenantContext {
        TenantContext {
            user_id: self.user_id,
            email: self.email.clone(),
            role: self.role,
            mfa_enabled: self.mfa_enabled,
            primary_organization_id: self.primary_organization_id,
            organization_name: self.organization_name.clone(),
            subscription_tier: self.subscription_tier,
            subscription_status: self.subscription_status,
            features: self.features.clone(),
            organizations: self.organizations.clone(),
        }
    }
}

/// Minimal claims for refresh and MFA challenge tokens
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubjectClaims {
    pub sub: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub jti: String,
}

impl SubjectClaims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Access + refresh token pair
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// Access token id, used to derive the CSRF token
    pub access_jti: String,
}
