//! Configuration management
//!
//! This module provides YAML-based configuration management with support for:
//! - Environment variable overrides (`HAVEN_*`)
//! - Multiple configuration file locations
//! - Default values for everything except signing secrets
//! - Lockout, rate limit, SSO role mapping and platform-operator settings

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::models::Role;
use crate::utils::AppError;

/// Minimum signing secret length outside development
pub const MIN_SECRET_LENGTH: usize = 32;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub sso: SsoConfig,
    #[serde(default)]
    pub platform_admin: PlatformAdminConfig,
    #[serde(default)]
    pub billing: BillingConfig,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Use `X-Forwarded-For` for client addresses (only behind a trusted proxy)
    #[serde(default)]
    pub trust_proxy_headers: bool,
    /// Allowed CORS origins; empty disables cross-origin access
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trust_proxy_headers: false,
            cors_origins: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Token and credential configuration.
///
/// There is deliberately no default for the signing secrets.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub access_secret: String,
    #[serde(default)]
    pub refresh_secret: String,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_audience")]
    pub audience: String,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
    #[serde(default = "default_mfa_challenge_ttl")]
    pub mfa_challenge_ttl_secs: u64,
    #[serde(default = "default_reset_token_ttl")]
    pub reset_token_ttl_secs: u64,
    #[serde(default = "default_password_min_length")]
    pub password_min_length: usize,
    /// Mark session cookies `Secure`
    #[serde(default = "default_true")]
    pub cookie_secure: bool,
    /// Issuer label shown in authenticator apps
    #[serde(default = "default_totp_issuer")]
    pub totp_issuer: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            refresh_secret: String::new(),
            issuer: default_issuer(),
            audience: default_audience(),
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
            mfa_challenge_ttl_secs: default_mfa_challenge_ttl(),
            reset_token_ttl_secs: default_reset_token_ttl(),
            password_min_length: default_password_min_length(),
            cookie_secure: true,
            totp_issuer: default_totp_issuer(),
        }
    }
}

fn default_issuer() -> String {
    "haven-gate".to_string()
}

fn default_audience() -> String {
    "haven-api".to_string()
}

fn default_access_ttl() -> u64 {
    15 * 60
}

fn default_refresh_ttl() -> u64 {
    7 * 24 * 60 * 60
}

fn default_mfa_challenge_ttl() -> u64 {
    5 * 60
}

fn default_reset_token_ttl() -> u64 {
    60 * 60
}

fn default_password_min_length() -> usize {
    12
}

fn default_totp_issuer() -> String {
    "Haven".to_string()
}

fn default_true() -> bool {
    true
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://haven-gate.db".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub target: LogTarget,
    /// Directory for log files (used when target is `file` or `both`)
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    #[serde(default = "default_true")]
    pub daily_rotation: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            daily_rotation: true,
        }
    }
}

/// Log output target
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    #[default]
    Console,
    File,
    Both,
}

/// Log line format
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("/var/log/haven-gate")
}

fn default_log_prefix() -> String {
    "haven-gate".to_string()
}

/// Brute-force lockout thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LockoutConfig {
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    #[serde(default = "default_lockout_window")]
    pub window_secs: u64,
    #[serde(default = "default_lockout_duration")]
    pub lockout_secs: u64,
    #[serde(default = "default_max_failed_attempts")]
    pub mfa_max_failures: u32,
    #[serde(default = "default_mfa_lockout")]
    pub mfa_lockout_secs: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            window_secs: default_lockout_window(),
            lockout_secs: default_lockout_duration(),
            mfa_max_failures: default_max_failed_attempts(),
            mfa_lockout_secs: default_mfa_lockout(),
        }
    }
}

fn default_max_failed_attempts() -> u32 {
    5
}

fn default_lockout_window() -> u64 {
    15 * 60
}

fn default_lockout_duration() -> u64 {
    30 * 60
}

fn default_mfa_lockout() -> u64 {
    5 * 60
}

/// Per-client request limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Attempts allowed per window on login and password-reset endpoints
    #[serde(default = "default_auth_attempts")]
    pub auth_max_attempts: u32,
    #[serde(default = "default_lockout_window")]
    pub auth_window_secs: u64,
    #[serde(default = "default_api_rps")]
    pub api_requests_per_second: u32,
    #[serde(default = "default_api_burst")]
    pub api_burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auth_max_attempts: default_auth_attempts(),
            auth_window_secs: default_lockout_window(),
            api_requests_per_second: default_api_rps(),
            api_burst: default_api_burst(),
        }
    }
}

fn default_auth_attempts() -> u32 {
    5
}

fn default_api_rps() -> u32 {
    50
}

fn default_api_burst() -> u32 {
    100
}

/// External identity provider settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SsoConfig {
    /// Group or claim value to local role; anything unmapped becomes `staff`
    #[serde(default)]
    pub role_mapping: BTreeMap<String, Role>,
    /// Upper bound on any identity-provider round trip
    #[serde(default = "default_sso_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub oidc: Vec<OidcProviderConfig>,
}

impl Default for SsoConfig {
    fn default() -> Self {
        Self {
            role_mapping: BTreeMap::new(),
            timeout_secs: default_sso_timeout(),
            oidc: Vec::new(),
        }
    }
}

fn default_sso_timeout() -> u64 {
    10
}

/// One OpenID Connect provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OidcProviderConfig {
    /// Path segment used in `/auth/sso/{name}`
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub redirect_uri: String,
    #[serde(default = "default_groups_claim")]
    pub groups_claim: String,
}

fn default_groups_claim() -> String {
    "groups".to_string()
}

/// Platform-operator gate settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PlatformAdminConfig {
    /// Addresses or CIDR blocks; empty denies every request
    #[serde(default)]
    pub ip_allowlist: Vec<String>,
}

impl PlatformAdminConfig {
    /// Parse the allow-list; single addresses become host networks
    pub fn parsed_allowlist(&self) -> Result<Vec<IpNet>, AppError> {
        self.ip_allowlist
            .iter()
            .map(|entry| {
                let entry = entry.trim();
                entry
                    .parse::<IpNet>()
                    .or_else(|_| entry.parse::<IpAddr>().map(IpNet::from))
                    .map_err(|_| {
                        AppError::Configuration(format!(
                            "Invalid platform admin allow-list entry: {}",
                            entry
                        ))
                    })
            })
            .collect()
    }
}

/// Billing collaborator settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BillingConfig {
    /// Shared secret for `X-Billing-Signature`; the endpoint rejects everything when unset
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

impl AppConfig {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values
    /// 2. Configuration file (YAML)
    /// 3. Environment variables (prefixed with HAVEN_)
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let config_path = std::env::var("HAVEN_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(Self::find_config_file);

        let mut config = match config_path {
            Some(ref path) if path.exists() => {
                eprintln!("[CONFIG] Loading configuration from: {:?}", path);
                Self::from_file(path)?
            }
            Some(ref path) => {
                eprintln!("[CONFIG] Config file not found: {:?}, using defaults", path);
                AppConfig::default()
            }
            None => {
                eprintln!("[CONFIG] No config file found, using defaults");
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_norway::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Find the configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            PathBuf::from("config.yaml"),
            PathBuf::from("config/config.yaml"),
            PathBuf::from("/etc/haven-gate/config.yaml"),
            dirs::config_dir()
                .map(|p| p.join("haven-gate/config.yaml"))
                .unwrap_or_default(),
        ];

        paths.into_iter().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HAVEN_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("HAVEN_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(trust) = std::env::var("HAVEN_TRUST_PROXY_HEADERS") {
            self.server.trust_proxy_headers = matches!(trust.as_str(), "1" | "true" | "yes");
        }
        if let Ok(env) = std::env::var("HAVEN_ENVIRONMENT") {
            self.environment = match env.to_lowercase().as_str() {
                "production" | "prod" => Environment::Production,
                _ => Environment::Development,
            };
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(secret) = std::env::var("HAVEN_ACCESS_SECRET") {
            self.auth.access_secret = secret;
        }
        if let Ok(secret) = std::env::var("HAVEN_REFRESH_SECRET") {
            self.auth.refresh_secret = secret;
        }
        if let Ok(secret) = std::env::var("HAVEN_BILLING_SECRET") {
            self.billing.webhook_secret = Some(secret);
        }

        if let Ok(ips) = std::env::var("HAVEN_PLATFORM_ADMIN_IPS") {
            self.platform_admin.ip_allowlist = ips
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("HAVEN_LOG_FORMAT") {
            self.logging.format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "compact" => LogFormat::Compact,
                _ => LogFormat::Pretty,
            };
        }
    }

    /// Validate configuration; any error here must abort startup
    pub fn validate(&self) -> Result<(), AppError> {
        validate_secrets(
            &self.auth.access_secret,
            &self.auth.refresh_secret,
            self.environment,
        )?;

        if self.server.port == 0 {
            return Err(AppError::Configuration("Server port cannot be 0".into()));
        }
        if self.database.url.is_empty() {
            return Err(AppError::Configuration("Database URL cannot be empty".into()));
        }
        if self.auth.access_token_ttl_secs == 0 || self.auth.refresh_token_ttl_secs == 0 {
            return Err(AppError::Configuration("Token lifetimes must be positive".into()));
        }
        if self.lockout.max_failed_attempts == 0 || self.lockout.mfa_max_failures == 0 {
            return Err(AppError::Configuration(
                "Lockout thresholds must be positive".into(),
            ));
        }

        if let Some((group, _)) = self
            .sso
            .role_mapping
            .iter()
            .find(|(_, role)| role.is_platform())
        {
            return Err(AppError::Configuration(format!(
                "SSO group '{}' cannot map to platform_admin",
                group
            )));
        }

        self.platform_admin.parsed_allowlist()?;

        if let Some(ref secret) = self.billing.webhook_secret {
            if self.environment.is_production() && secret.len() < MIN_SECRET_LENGTH {
                return Err(AppError::Configuration(format!(
                    "Billing webhook secret must be at least {} characters",
                    MIN_SECRET_LENGTH
                )));
            }
        }

        Ok(())
    }
}

/// Signing secrets must be present and distinct, and long enough in production
pub fn validate_secrets(
    access_secret: &str,
    refresh_secret: &str,
    environment: Environment,
) -> Result<(), AppError> {
    if access_secret.is_empty() || refresh_secret.is_empty() {
        return Err(AppError::Configuration(
            "Access and refresh signing secrets must both be set".into(),
        ));
    }
    if access_secret == refresh_secret {
        return Err(AppError::Configuration(
            "Access and refresh signing secrets must differ".into(),
        ));
    }
    if environment.is_production()
        && (access_secret.len() < MIN_SECRET_LENGTH || refresh_secret.len() < MIN_SECRET_LENGTH)
    {
        return Err(AppError::Configuration(format!(
            "Signing secrets must be at least {} characters in production",
            MIN_SECRET_LENGTH
        )));
    }
    Ok(())
}
