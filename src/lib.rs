//! Haven Gate Library
//!
//! Authentication, tenant resolution, authorization guards and subscription
//! entitlements for the Haven case-management API.

use std::sync::Arc;

use anyhow::Result;
use ipnet::IpNet;

pub mod api;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

pub use config::AppConfig;
pub use db::DbPool;
pub use middleware::{auth_middleware, AuthUser};

use middleware::RateLimitState;
use services::{
    sso::SsoRegistry, AuditLedger, AuthService, BillingService, EntitlementService,
    LogResetNotifier, PlatformService, ResetNotifier, TenantResolver, TokenService,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Database connection pool
    pub db: DbPool,
    pub tokens: Arc<TokenService>,
    pub tenants: Arc<TenantResolver>,
    pub entitlements: Arc<EntitlementService>,
    pub audit: Arc<AuditLedger>,
    pub auth: Arc<AuthService>,
    pub billing: Arc<BillingService>,
    pub platform: Arc<PlatformService>,
    /// Parsed platform-operator allow-list
    pub platform_allowlist: Arc<Vec<IpNet>>,
    /// Strict limiter for login and password-reset endpoints
    pub auth_rate_limit: RateLimitState,
    pub api_rate_limit: RateLimitState,
}

impl AppState {
    /// Connect to the configured database and build every service
    pub async fn build(config: AppConfig) -> Result<Self> {
        let pool = db::init_pool(&config.database.url, config.database.max_connections).await?;
        Self::with_pool(config, pool)
    }

    /// Build every service over an existing pool.
    ///
    /// Fails on any configuration error; there is no degraded mode.
    pub fn with_pool(config: AppConfig, pool: DbPool) -> Result<Self> {
        Self::with_notifier(config, pool, Arc::new(LogResetNotifier))
    }

    /// Like [`AppState::with_pool`], delivering password resets through `notifier`
    pub fn with_notifier(
        config: AppConfig,
        pool: DbPool,
        notifier: Arc<dyn ResetNotifier>,
    ) -> Result<Self> {
        config.validate()?;

        let tokens = Arc::new(TokenService::new(&config.auth, config.environment)?);
        let tenants = Arc::new(TenantResolver::new(pool.clone()));
        let entitlements = Arc::new(EntitlementService::new(pool.clone()));
        let audit = Arc::new(AuditLedger::new(pool.clone()));
        let sso = Arc::new(SsoRegistry::from_config(&config.sso)?);

        let auth = Arc::new(AuthService::new(
            pool.clone(),
            tokens.clone(),
            tenants.clone(),
            audit.clone(),
            sso,
            notifier,
            &config.auth,
            &config.lockout,
        ));
        let billing = Arc::new(BillingService::new(
            pool.clone(),
            audit.clone(),
            config.billing.webhook_secret.clone(),
        ));
        let platform = Arc::new(PlatformService::new(pool.clone(), audit.clone()));

        let platform_allowlist = Arc::new(config.platform_admin.parsed_allowlist()?);
        let trust_proxy = config.server.trust_proxy_headers;
        let auth_rate_limit = RateLimitState::for_auth(&config.rate_limit, trust_proxy);
        let api_rate_limit = RateLimitState::for_api(&config.rate_limit, trust_proxy);

        Ok(Self {
            config: Arc::new(config),
            db: pool,
            tokens,
            tenants,
            entitlements,
            audit,
            auth,
            billing,
            platform,
            platform_allowlist,
            auth_rate_limit,
            api_rate_limit,
        })
    }
}
