//! Identity model and authentication DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::{Role, TokenPair};

/// How an identity authenticates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    /// Email + password (optionally with TOTP)
    #[default]
    Local,
    /// Provisioned from an external identity provider; no password hash
    Sso,
}

impl AuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthProvider::Local => "local",
            AuthProvider::Sso => "sso",
        }
    }
}

impl std::str::FromStr for AuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(AuthProvider::Local),
            "sso" => Ok(AuthProvider::Sso),
            _ => Err(format!("Invalid auth provider: {}", s)),
        }
    }
}

/// Failed-attempt state for one account
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockoutRecord {
    pub failed_attempts: i64,
    pub last_failed_at: Option<DateTime<Utc>>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutRecord {
    /// Seconds left on an active lock, if any, rounded up
    pub fn remaining_lock(&self, now: DateTime<Utc>) -> Option<u64> {
        self.locked_until
            .filter(|until| *until > now)
            .map(|until| {
                let millis = (until - now).num_milliseconds();
                ((millis + 999) / 1000).max(1) as u64
            })
    }
}

/// Identity entity (credential store row)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    /// `None` for SSO-only accounts
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: Role,
    #[serde(skip_serializing)]
    pub mfa_secret: Option<String>,
    pub mfa_enabled: bool,
    #[serde(skip)]
    pub lockout: LockoutRecord,
    #[serde(skip)]
    pub mfa_lockout: LockoutRecord,
    pub force_password_change: bool,
    pub is_verified: bool,
    pub is_active: bool,
    pub auth_provider: AuthProvider,
    pub external_id: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating an identity
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub password_hash: Option<String>,
    pub role: Role,
    pub auth_provider: AuthProvider,
    pub external_id: Option<String>,
    pub is_verified: bool,
}

/// Public view of the current identity
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPublic {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
    pub mfa_enabled: bool,
    pub force_password_change: bool,
    pub auth_provider: AuthProvider,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&Identity> for IdentityPublic {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            email: identity.email.clone(),
            role: identity.role,
            mfa_enabled: identity.mfa_enabled,
            force_password_change: identity.force_password_change,
            auth_provider: identity.auth_provider,
            last_login_at: identity.last_login_at,
        }
    }
}

/// Login request
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 320))]
    pub email: String,
    #[validate(length(min = 1, max = 1024))]
    pub password: String,
    /// Deliver tokens as httpOnly cookies instead of only in the body
    #[serde(default)]
    pub use_cookies: bool,
}

/// Second login step for MFA-enabled accounts
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MfaVerifyRequest {
    #[validate(length(min = 1))]
    pub mfa_token: String,
    #[validate(length(equal = 6))]
    pub code: String,
    #[serde(default)]
    pub use_cookies: bool,
}

/// Refresh request; the token may instead come from the `refresh_token` cookie
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ForgotPasswordRequest {
    #[validate(length(min = 1, max = 320))]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 1, max = 1024))]
    pub new_password: String,
}

/// TOTP code submitted to enable or disable MFA
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MfaCodeRequest {
    #[validate(length(equal = 6))]
    pub code: String,
}

/// Pending MFA enrollment returned by setup
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaSetupResponse {
    pub secret: String,
    pub otpauth_url: String,
}

/// Body returned after a successful login, MFA verification or refresh
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
}

impl AuthResponse {
    pub fn new(pair: &TokenPair, csrf_token: Option<String>) -> Self {
        Self {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            token_type: "Bearer",
            expires_in: pair.expires_in,
            csrf_token,
        }
    }
}

/// Body returned when a password login still needs a second factor
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaChallengeResponse {
    pub mfa_required: bool,
    pub mfa_token: String,
}
