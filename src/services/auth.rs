//! Authentication gateway
//!
//! Verifies credentials (password, TOTP second factor, SSO) and turns a verified
//! identity into a token pair via the tenant resolver. It never touches signing
//! secrets itself.

use std::sync::Arc;

use anyhow::Result;
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use once_cell::sync::Lazy;
use rand::{rngs::OsRng, RngCore};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{AuthConfig, LockoutConfig};
use crate::db::user_repository::{FailureCounter, LockoutPolicy};
use crate::db::{DbPool, UserRepository};
use crate::models::{
    AuthProvider, Identity, IdentityPublic, MfaSetupResponse, NewAuditEvent, NewIdentity,
    RiskLevel, TenantContext, TokenPair,
};
use crate::services::sso::{SsoCredential, SsoRegistry};
use crate::services::{totp, AuditLedger, ResetNotifier, TenantResolver, TokenService};
use crate::utils::validation::{check_password_policy, normalize_email};
use crate::utils::{AppError, AppResult};

/// Hash verified against when the account does not exist, so the miss path
/// costs the same as a wrong password
static DUMMY_HASH: Lazy<String> =
    Lazy::new(|| AuthService::hash_password("haven-gate-timing-equalizer").unwrap_or_default());

/// Tokens plus the context they were issued for
#[derive(Debug, Clone)]
pub struct Session {
    pub tokens: TokenPair,
    pub context: TenantContext,
}

#[derive(Debug, Clone)]
pub enum LoginOutcome {
    Authenticated(Session),
    /// Password accepted; a TOTP code must be exchanged with this challenge token
    MfaRequired { mfa_token: String },
}

pub struct AuthService {
    pool: DbPool,
    tokens: Arc<TokenService>,
    tenants: Arc<TenantResolver>,
    audit: Arc<AuditLedger>,
    sso: Arc<SsoRegistry>,
    notifier: Arc<dyn ResetNotifier>,
    password_policy: LockoutPolicy,
    mfa_policy: LockoutPolicy,
    totp_issuer: String,
    reset_token_ttl: Duration,
    password_min_length: usize,
}

impl AuthService {
    pub fn new(
        pool: DbPool,
        tokens: Arc<TokenService>,
        tenants: Arc<TenantResolver>,
        audit: Arc<AuditLedger>,
        sso: Arc<SsoRegistry>,
        notifier: Arc<dyn ResetNotifier>,
        auth: &AuthConfig,
        lockout: &LockoutConfig,
    ) -> Self {
        Self {
            pool,
            tokens,
            tenants,
            audit,
            sso,
            notifier,
            password_policy: LockoutPolicy {
                max_attempts: lockout.max_failed_attempts,
                window: Duration::seconds(lockout.window_secs as i64),
                lock_duration: Duration::seconds(lockout.lockout_secs as i64),
            },
            mfa_policy: LockoutPolicy {
                max_attempts: lockout.mfa_max_failures,
                window: Duration::seconds(lockout.window_secs as i64),
                lock_duration: Duration::seconds(lockout.mfa_lockout_secs as i64),
            },
            totp_issuer: auth.totp_issuer.clone(),
            reset_token_ttl: Duration::seconds(auth.reset_token_ttl_secs as i64),
            password_min_length: auth.password_min_length,
        }
    }

    /// Hash a password using Argon2id
    pub fn hash_password(password: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();
        let password_hash = argon2
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?
            .to_string();
        Ok(password_hash)
    }

    /// Verify a password against a hash
    pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
        let parsed_hash = PasswordHash::new(password_hash)
            .map_err(|e| anyhow::anyhow!("Invalid password hash format: {}", e))?;
        Ok(Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok())
    }

    fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    /// Password login.
    ///
    /// Unknown email, SSO-only account and wrong password all fail with the same
    /// `InvalidCredentials`. The lock is checked before the hash is compared.
    pub async fn login(&self, email: &str, password: &str, ip: Option<String>) -> AppResult<LoginOutcome> {
        let email = normalize_email(email);
        let now = Utc::now();

        let identity = match self.users().get_by_email(&email).await? {
            Some(identity) if identity.is_active => identity,
            _ => {
                let _ = Self::verify_password(password, &DUMMY_HASH);
                self.audit
                    .record(
                        NewAuditEvent::new("auth.login", "user:unknown")
                            .failure()
                            .risk(RiskLevel::Medium)
                            .metadata(json!({ "email": email, "reason": "unknown_account" }))
                            .ip(ip),
                    )
                    .await;
                return Err(AppError::InvalidCredentials);
            }
        };

        if let Some(retry_after_secs) = identity.lockout.remaining_lock(now) {
            self.audit
                .record(
                    NewAuditEvent::new("auth.login", format!("user:{}", identity.id))
                        .actor(identity.id)
                        .failure()
                        .risk(RiskLevel::High)
                        .metadata(json!({ "reason": "account_locked" }))
                        .ip(ip),
                )
                .await;
            return Err(AppError::AccountLocked { retry_after_secs });
        }

        let verified = match identity.password_hash.as_deref() {
            Some(hash) => Self::verify_password(password, hash)?,
            None => {
                let _ = Self::verify_password(password, &DUMMY_HASH);
                false
            }
        };

        if !verified {
            let record = self
                .users()
                .record_failure(identity.id, FailureCounter::Password, self.password_policy, now)
                .await?;
            let locked = record.remaining_lock(now).is_some();
            if locked {
                warn!(user_id = %identity.id, attempts = record.failed_attempts, "Account locked after repeated failures");
            }
            self.audit
                .record(
                    NewAuditEvent::new("auth.login", format!("user:{}", identity.id))
                        .actor(identity.id)
                        .failure()
                        .risk(if locked { RiskLevel::High } else { RiskLevel::Medium })
                        .metadata(json!({
                            "reason": "invalid_password",
                            "failedAttempts": record.failed_attempts,
                            "locked": locked,
                        }))
                        .ip(ip),
                )
                .await;
            return Err(AppError::InvalidCredentials);
        }

        self.users()
            .clear_failures(identity.id, FailureCounter::Password)
            .await?;

        if identity.mfa_enabled {
            let mfa_token = self.tokens.issue_mfa_challenge(identity.id)?;
            self.audit
                .record(
                    NewAuditEvent::new("auth.login.mfa_challenge", format!("user:{}", identity.id))
                        .actor(identity.id)
                        .ip(ip),
                )
                .await;
            return Ok(LoginOutcome::MfaRequired { mfa_token });
        }

        self.complete_login(&identity, "password", ip)
            .await
            .map(LoginOutcome::Authenticated)
    }

    /// Second login step: exchange a challenge token and TOTP code for a session
    pub async fn verify_mfa(&self, mfa_token: &str, code: &str, ip: Option<String>) -> AppResult<Session> {
        let user_id = self.tokens.verify_mfa_challenge(mfa_token)?;
        let identity = self
            .users()
            .get_by_id(user_id)
            .await?
            .filter(|i| i.is_active && i.mfa_enabled)
            .ok_or(AppError::TokenInvalid)?;

        self.check_totp(&identity, code, ip.clone()).await?;
        self.complete_login(&identity, "password+totp", ip).await
    }

    /// Resolve tenant context, stamp the login and issue tokens
    async fn complete_login(&self, identity: &Identity, method: &str, ip: Option<String>) -> AppResult<Session> {
        let Some(context) = self.tenants.resolve(identity.id).await? else {
            self.audit
                .record(
                    NewAuditEvent::new("auth.login", format!("user:{}", identity.id))
                        .actor(identity.id)
                        .failure()
                        .risk(RiskLevel::Medium)
                        .metadata(json!({ "reason": "no_active_membership", "method": method }))
                        .ip(ip),
                )
                .await;
            return Err(AppError::TenantResolutionFailed);
        };

        self.users().record_login(identity.id, Utc::now()).await?;
        let tokens = self.tokens.issue(&context)?;

        info!(user_id = %identity.id, method = method, "User logged in");
        self.audit
            .record(
                NewAuditEvent::new("auth.login", format!("user:{}", identity.id))
                    .actor(identity.id)
                    .organization(context.primary_organization_id)
                    .metadata(json!({ "method": method }))
                    .ip(ip),
            )
            .await;

        Ok(Session { tokens, context })
    }

    /// Verify a TOTP code against the MFA counter and its lock
    async fn check_totp(&self, identity: &Identity, code: &str, ip: Option<String>) -> AppResult<()> {
        let now = Utc::now();
        if let Some(retry_after_secs) = identity.mfa_lockout.remaining_lock(now) {
            return Err(AppError::RateLimited { retry_after_secs });
        }
        let secret = identity
            .mfa_secret
            .as_deref()
            .ok_or_else(|| AppError::BadRequest("MFA setup has not been started".to_string()))?;

        if totp::verify_code(secret, code, &self.totp_issuer, &identity.email)? {
            self.users().clear_failures(identity.id, FailureCounter::Mfa).await?;
            return Ok(());
        }

        let record = self
            .users()
            .record_failure(identity.id, FailureCounter::Mfa, self.mfa_policy, now)
            .await?;
        self.audit
            .record(
                NewAuditEvent::new("auth.mfa", format!("user:{}", identity.id))
                    .actor(identity.id)
                    .failure()
                    .risk(RiskLevel::Medium)
                    .metadata(json!({ "failedAttempts": record.failed_attempts }))
                    .ip(ip),
            )
            .await;
        Err(AppError::InvalidCredentials)
    }

    /// Exchange a refresh token; the tenant context is re-read from storage
    pub async fn refresh(&self, refresh_token: &str, ip: Option<String>) -> AppResult<Session> {
        match self.tokens.refresh(refresh_token, &self.tenants).await {
            Ok((tokens, context)) => Ok(Session { tokens, context }),
            Err(AppError::TenantResolutionFailed) => {
                let actor = self.tokens.verify_refresh(refresh_token).ok();
                let mut event = NewAuditEvent::new("auth.refresh", "session")
                    .failure()
                    .risk(RiskLevel::Medium)
                    .metadata(json!({ "reason": "no_active_membership" }))
                    .ip(ip);
                if let Some(user_id) = actor {
                    event = event.actor(user_id);
                }
                self.audit.record(event).await;
                Err(AppError::TenantResolutionFailed)
            }
            Err(e) => Err(e),
        }
    }

    /// Login through an external identity provider.
    ///
    /// The first login provisions an SSO-only identity. An email already owned by
    /// an unlinked local account is refused rather than silently merged.
    pub async fn sso_login(
        &self,
        provider: &str,
        credential: &SsoCredential,
        ip: Option<String>,
    ) -> AppResult<Session> {
        let (external, role) = match self.sso.authenticate(provider, credential).await {
            Ok(result) => result,
            Err(e) => {
                self.audit
                    .record(
                        NewAuditEvent::new("auth.sso", format!("provider:{}", provider))
                            .failure()
                            .risk(RiskLevel::Medium)
                            .ip(ip),
                    )
                    .await;
                return Err(e);
            }
        };

        let external_id = external.external_id();
        let identity = match self.users().get_by_external_id(&external_id).await? {
            Some(mut identity) if identity.is_active => {
                // the provider's current groups decide, not the ones seen at provisioning
                if identity.role != role {
                    self.users().set_role(identity.id, role).await?;
                    info!(user_id = %identity.id, from = %identity.role, to = %role, "Re-mapped SSO role");
                    identity.role = role;
                }
                identity
            }
            Some(_) => return Err(AppError::InvalidCredentials),
            None => {
                let email = normalize_email(&external.email);
                if self.users().get_by_email(&email).await?.is_some() {
                    self.audit
                        .record(
                            NewAuditEvent::new("auth.sso", format!("provider:{}", provider))
                                .failure()
                                .risk(RiskLevel::High)
                                .metadata(json!({ "reason": "email_owned_by_unlinked_account" }))
                                .ip(ip),
                        )
                        .await;
                    return Err(AppError::InvalidCredentials);
                }
                let created = self
                    .users()
                    .create(&NewIdentity {
                        email,
                        password_hash: None,
                        role,
                        auth_provider: AuthProvider::Sso,
                        external_id: Some(external_id),
                        is_verified: true,
                    })
                    .await?;
                info!(user_id = %created.id, provider = provider, role = %role, "Provisioned SSO identity");
                created
            }
        };

        self.complete_login(&identity, &format!("sso:{}", provider), ip).await
    }

    /// Start MFA enrollment; the secret stays pending until a code confirms it
    pub async fn setup_mfa(&self, user_id: Uuid) -> AppResult<MfaSetupResponse> {
        let identity = self.active_identity(user_id).await?;
        if identity.mfa_enabled {
            return Err(AppError::BadRequest("MFA is already enabled".to_string()));
        }

        let (secret, otpauth_url) = totp::generate_enrollment(&self.totp_issuer, &identity.email)?;
        self.users().set_mfa(user_id, Some(&secret), false).await?;
        self.audit
            .record(NewAuditEvent::new("auth.mfa.setup", format!("user:{}", user_id)).actor(user_id))
            .await;

        Ok(MfaSetupResponse { secret, otpauth_url })
    }

    pub async fn enable_mfa(&self, user_id: Uuid, code: &str) -> AppResult<()> {
        let identity = self.active_identity(user_id).await?;
        if identity.mfa_enabled {
            return Err(AppError::BadRequest("MFA is already enabled".to_string()));
        }
        self.check_totp(&identity, code, None).await.map_err(invalid_code)?;

        self.users()
            .set_mfa(user_id, identity.mfa_secret.as_deref(), true)
            .await?;
        self.audit
            .record(
                NewAuditEvent::new("auth.mfa.enable", format!("user:{}", user_id))
                    .actor(user_id)
                    .risk(RiskLevel::Medium),
            )
            .await;
        Ok(())
    }

    pub async fn disable_mfa(&self, user_id: Uuid, code: &str) -> AppResult<()> {
        let identity = self.active_identity(user_id).await?;
        if !identity.mfa_enabled {
            return Err(AppError::BadRequest("MFA is not enabled".to_string()));
        }
        self.check_totp(&identity, code, None).await.map_err(invalid_code)?;

        self.users().set_mfa(user_id, None, false).await?;
        self.audit
            .record(
                NewAuditEvent::new("auth.mfa.disable", format!("user:{}", user_id))
                    .actor(user_id)
                    .risk(RiskLevel::High),
            )
            .await;
        Ok(())
    }

    /// Create a reset token for a local account.
    ///
    /// Unknown, inactive and SSO-only accounts get nothing, and a delivery failure
    /// is only logged, so callers can answer identically either way. The raw token
    /// goes to the reset notifier and nowhere else.
    pub async fn forgot_password(&self, email: &str, ip: Option<String>) -> AppResult<()> {
        let email = normalize_email(email);
        let Some(identity) = self
            .users()
            .get_by_email(&email)
            .await?
            .filter(|i| i.is_active && i.password_hash.is_some())
        else {
            return Ok(());
        };

        let mut raw = [0u8; 32];
        OsRng.fill_bytes(&mut raw);
        let token = URL_SAFE_NO_PAD.encode(raw);

        self.users()
            .store_reset_token(identity.id, &hash_reset_token(&token), Utc::now() + self.reset_token_ttl)
            .await?;
        self.audit
            .record(
                NewAuditEvent::new("auth.password_reset.requested", format!("user:{}", identity.id))
                    .actor(identity.id)
                    .ip(ip),
            )
            .await;

        if let Err(e) = self.notifier.send_reset(identity.id, &identity.email, &token).await {
            warn!(user_id = %identity.id, error = %e, "Failed to deliver password reset");
        }
        Ok(())
    }

    /// Consume a reset token and set the new password; also clears lockout
    pub async fn reset_password(&self, token: &str, new_password: &str, ip: Option<String>) -> AppResult<()> {
        check_password_policy(new_password, self.password_min_length).map_err(AppError::Validation)?;

        let Some(user_id) = self
            .users()
            .consume_reset_token(&hash_reset_token(token), Utc::now())
            .await?
        else {
            self.audit
                .record(
                    NewAuditEvent::new("auth.password_reset", "user:unknown")
                        .failure()
                        .risk(RiskLevel::Medium)
                        .ip(ip),
                )
                .await;
            return Err(AppError::BadRequest("Invalid or expired reset token".to_string()));
        };

        let hash = Self::hash_password(new_password)?;
        self.users().set_password(user_id, &hash).await?;
        self.audit
            .record(
                NewAuditEvent::new("auth.password_reset", format!("user:{}", user_id))
                    .actor(user_id)
                    .risk(RiskLevel::Medium)
                    .ip(ip),
            )
            .await;
        Ok(())
    }

    pub async fn current_user(&self, user_id: Uuid) -> AppResult<IdentityPublic> {
        let identity = self.active_identity(user_id).await?;
        Ok(IdentityPublic::from(&identity))
    }

    async fn active_identity(&self, user_id: Uuid) -> AppResult<Identity> {
        self.users()
            .get_by_id(user_id)
            .await?
            .filter(|i| i.is_active)
            .ok_or(AppError::Unauthorized)
    }
}

fn invalid_code(err: AppError) -> AppError {
    match err {
        AppError::InvalidCredentials => AppError::BadRequest("Invalid MFA code".to_string()),
        other => other,
    }
}

/// Reset tokens are stored as SHA-256 hex digests
fn hash_reset_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}
