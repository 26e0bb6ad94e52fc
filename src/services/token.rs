//! Token service
//!
//! Issues and verifies HS256 tokens. Access and refresh tokens are signed with
//! distinct secrets; verification is pure (no I/O) and uses zero leeway.
//!
//! Tenant and subscription claims in an access token are a snapshot taken at
//! issuance. Changes become visible at the next refresh, so callers see at most
//! one access-token lifetime of staleness.

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use uuid::Uuid;

use crate::config::{validate_secrets, AuthConfig, Environment};
use crate::models::{Claims, SubjectClaims, TenantContext, TokenPair, TokenType};
use crate::services::TenantResolver;
use crate::utils::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

struct SigningKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKeys {
    fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

pub struct TokenService {
    access: SigningKeys,
    refresh: SigningKeys,
    csrf_mac: HmacSha256,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
    mfa_challenge_ttl: Duration,
}

impl TokenService {
    /// Build the service; missing or weak secrets are a fatal configuration error
    pub fn new(config: &AuthConfig, environment: Environment) -> AppResult<Self> {
        validate_secrets(&config.access_secret, &config.refresh_secret, environment)?;

        let mut csrf_key = b"csrf:".to_vec();
        csrf_key.extend_from_slice(config.access_secret.as_bytes());
        let csrf_mac = <HmacSha256 as Mac>::new_from_slice(&csrf_key)
            .map_err(|e| AppError::Configuration(format!("Invalid CSRF key: {}", e)))?;

        Ok(Self {
            access: SigningKeys::new(&config.access_secret),
            refresh: SigningKeys::new(&config.refresh_secret),
            csrf_mac,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::seconds(config.access_token_ttl_secs as i64),
            refresh_ttl: Duration::seconds(config.refresh_token_ttl_secs as i64),
            mfa_challenge_ttl: Duration::seconds(config.mfa_challenge_ttl_secs as i64),
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue an access/refresh pair for a resolved tenant context
    pub fn issue(&self, context: &TenantContext) -> AppResult<TokenPair> {
        self.issue_at(context, Utc::now())
    }

    /// Issue with an explicit issuance time
    pub fn issue_at(&self, context: &TenantContext, now: DateTime<Utc>) -> AppResult<TokenPair> {
        let access_jti = Uuid::new_v4().to_string();
        let claims = Claims {
            sub: context.user_id.to_string(),
            user_id: context.user_id,
            email: context.email.clone(),
            role: context.role,
            primary_organization_id: context.primary_organization_id,
            organization_name: context.organization_name.clone(),
            subscription_tier: context.subscription_tier,
            subscription_status: context.subscription_status,
            features: context.features.clone(),
            organizations: context.organizations.clone(),
            tenant_id: context.primary_organization_id,
            mfa_enabled: context.mfa_enabled,
            token_type: TokenType::Access,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: access_jti.clone(),
        };
        let access_token = encode(&Header::default(), &claims, &self.access.encoding)
            .map_err(|e| AppError::Internal(format!("Failed to sign access token: {}", e)))?;

        let refresh_claims = self.subject_claims(context.user_id, TokenType::Refresh, now, self.refresh_ttl);
        let refresh_token = encode(&Header::default(), &refresh_claims, &self.refresh.encoding)
            .map_err(|e| AppError::Internal(format!("Failed to sign refresh token: {}", e)))?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_ttl.num_seconds().max(0) as u64,
            access_jti,
        })
    }

    /// Verify an access token
    pub fn verify(&self, token: &str) -> AppResult<Claims> {
        let claims: Claims = self.decode_with(token, &self.access.decoding)?;
        if claims.token_type != TokenType::Access || claims.sub != claims.user_id.to_string() {
            return Err(AppError::TokenInvalid);
        }
        Ok(claims)
    }

    /// Verify a refresh token and return its subject
    pub fn verify_refresh(&self, token: &str) -> AppResult<Uuid> {
        let claims: SubjectClaims = self.decode_with(token, &self.refresh.decoding)?;
        if claims.token_type != TokenType::Refresh {
            return Err(AppError::TokenInvalid);
        }
        claims.user_id().ok_or(AppError::TokenInvalid)
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// Tenant context is re-resolved from storage; nothing is copied from the old token.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        resolver: &TenantResolver,
    ) -> AppResult<(TokenPair, TenantContext)> {
        let user_id = self.verify_refresh(refresh_token)?;
        let context = resolver
            .resolve(user_id)
            .await?
            .ok_or(AppError::TenantResolutionFailed)?;
        let pair = self.issue(&context)?;
        Ok((pair, context))
    }

    /// Short-lived token proving the password step succeeded
    pub fn issue_mfa_challenge(&self, user_id: Uuid) -> AppResult<String> {
        let claims = self.subject_claims(
            user_id,
            TokenType::MfaChallenge,
            Utc::now(),
            self.mfa_challenge_ttl,
        );
        encode(&Header::default(), &claims, &self.access.encoding)
            .map_err(|e| AppError::Internal(format!("Failed to sign MFA challenge: {}", e)))
    }

    pub fn verify_mfa_challenge(&self, token: &str) -> AppResult<Uuid> {
        let claims: SubjectClaims = self.decode_with(token, &self.access.decoding)?;
        if claims.token_type != TokenType::MfaChallenge {
            return Err(AppError::TokenInvalid);
        }
        claims.user_id().ok_or(AppError::TokenInvalid)
    }

    /// CSRF token bound to one access token id
    pub fn csrf_token(&self, access_jti: &str) -> String {
        hex::encode(self.csrf_mac(access_jti).finalize().into_bytes())
    }

    pub fn verify_csrf(&self, access_jti: &str, presented: &str) -> bool {
        let Ok(bytes) = hex::decode(presented) else {
            return false;
        };
        self.csrf_mac(access_jti).verify_slice(&bytes).is_ok()
    }

    fn csrf_mac(&self, access_jti: &str) -> HmacSha256 {
        let mut mac = self.csrf_mac.clone();
        mac.update(access_jti.as_bytes());
        mac
    }

    fn subject_claims(
        &self,
        user_id: Uuid,
        token_type: TokenType,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> SubjectClaims {
        SubjectClaims {
            sub: user_id.to_string(),
            token_type,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
            jti: Uuid::new_v4().to_string(),
        }
    }

    fn decode_with<T: DeserializeOwned>(&self, token: &str, key: &DecodingKey) -> AppResult<T> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "aud", "sub"]);

        decode::<T>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AppError::TokenExpired,
                _ => AppError::TokenInvalid,
            })
    }
}
