//! Single sign-on adapters
//!
//! Identity providers only hand back a verified [`ExternalIdentity`]. Group
//! claims are mapped to a tenant role through a static table; anything
//! unmapped lands on `staff`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{OidcProviderConfig, SsoConfig};
use crate::models::Role;
use crate::utils::{AppError, AppResult};

/// Profile claims produced by a provider after it verified the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider: String,
    pub subject: String,
    pub email: String,
    pub groups: Vec<String>,
}

impl ExternalIdentity {
    /// Stable link key stored on the local identity
    pub fn external_id(&self) -> String {
        format!("{}:{}", self.provider, self.subject)
    }
}

/// Credential presented to a provider
#[derive(Debug, Clone)]
pub enum SsoCredential {
    /// OAuth2 / OIDC authorization code
    AuthorizationCode(String),
    /// Signed assertion (SAML)
    Assertion(String),
    /// Directory bind (LDAP)
    Bind { username: String, password: String },
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn authenticate(&self, credential: &SsoCredential) -> Result<ExternalIdentity>;
}

/// Maps provider group claims to a tenant role
#[derive(Debug, Clone, Default)]
pub struct RoleMapper {
    mapping: BTreeMap<String, Role>,
}

impl RoleMapper {
    pub fn new(mapping: BTreeMap<String, Role>) -> Self {
        Self { mapping }
    }

    /// Most senior mapped tenant role, or `staff`
    pub fn map(&self, groups: &[String]) -> Role {
        groups
            .iter()
            .filter_map(|g| self.mapping.get(g))
            .filter(|r| !r.is_platform())
            .max_by_key(|r| r.seniority())
            .copied()
            .unwrap_or(Role::Staff)
    }
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
    access_token: String,
}

/// OpenID Connect authorization-code adapter
pub struct OidcProvider {
    config: OidcProviderConfig,
    client: Client,
}

impl OidcProvider {
    pub fn new(config: OidcProviderConfig, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build OIDC HTTP client")?;
        Ok(Self { config, client })
    }

    async fn exchange_code(&self, code: &str) -> Result<String> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        let response = self
            .client
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await
            .context("Token endpoint request failed")?;

        if !response.status().is_success() {
            bail!("Token endpoint returned {}", response.status());
        }
        let body: TokenEndpointResponse = response
            .json()
            .await
            .context("Malformed token endpoint response")?;
        Ok(body.access_token)
    }

    async fn fetch_userinfo(&self, access_token: &str) -> Result<Value> {
        let response = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("Userinfo request failed")?;

        if !response.status().is_success() {
            bail!("Userinfo endpoint returned {}", response.status());
        }
        response.json().await.context("Malformed userinfo response")
    }

    fn identity_from_userinfo(&self, info: &Value) -> Result<ExternalIdentity> {
        let subject = info
            .get("sub")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("Userinfo is missing 'sub'"))?;
        let email = info
            .get("email")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Userinfo is missing 'email'"))?;
        if info.get("email_verified").and_then(Value::as_bool) == Some(false) {
            bail!("Provider reports the email as unverified");
        }

        let groups = match info.get(&self.config.groups_claim) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(single)) => vec![single.clone()],
            _ => Vec::new(),
        };

        Ok(ExternalIdentity {
            provider: self.config.name.clone(),
            subject: subject.to_string(),
            email: email.to_string(),
            groups,
        })
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn authenticate(&self, credential: &SsoCredential) -> Result<ExternalIdentity> {
        let SsoCredential::AuthorizationCode(code) = credential else {
            bail!("OIDC provider only accepts authorization codes");
        };
        let access_token = self.exchange_code(code).await?;
        let info = self.fetch_userinfo(&access_token).await?;
        self.identity_from_userinfo(&info)
    }
}

/// Registered providers plus the shared role mapping and call timeout
pub struct SsoRegistry {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
    mapper: RoleMapper,
    timeout: Duration,
}

impl SsoRegistry {
    pub fn new(mapper: RoleMapper, timeout: Duration) -> Self {
        Self {
            providers: HashMap::new(),
            mapper,
            timeout,
        }
    }

    pub fn from_config(config: &SsoConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let mut registry = Self::new(RoleMapper::new(config.role_mapping.clone()), timeout);
        for provider in &config.oidc {
            registry.register(Arc::new(OidcProvider::new(provider.clone(), timeout)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.contains_key(name)
    }

    /// Run the provider within the timeout and map its groups to a role.
    ///
    /// Provider errors and timeouts are both `InvalidCredentials`.
    pub async fn authenticate(
        &self,
        provider: &str,
        credential: &SsoCredential,
    ) -> AppResult<(ExternalIdentity, Role)> {
        let adapter = self
            .providers
            .get(provider)
            .ok_or_else(|| AppError::NotFound(format!("SSO provider '{}'", provider)))?;

        let identity = match tokio::time::timeout(self.timeout, adapter.authenticate(credential)).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                warn!(provider = provider, error = %e, "SSO authentication failed");
                return Err(AppError::InvalidCredentials);
            }
            Err(_) => {
                warn!(provider = provider, timeout_secs = self.timeout.as_secs(), "SSO provider timed out");
                return Err(AppError::InvalidCredentials);
            }
        };

        let role = self.mapper.map(&identity.groups);
        debug!(provider = provider, role = %role, "Mapped SSO groups to role");
        Ok((identity, role))
    }
}
