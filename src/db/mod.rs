//! Database layer
//!
//! SQLite-backed stores for:
//! - Identities, lockout counters and password reset tokens
//! - Organizations, subscription state, usage counters and memberships
//! - The append-only audit ledger
//! - Resident and property records

pub mod audit_repository;
pub mod billing_repository;
pub mod organization_repository;
pub mod resident_repository;
pub mod user_repository;

use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};

pub use audit_repository::AuditRepository;
pub use billing_repository::BillingRepository;
pub use organization_repository::{OrganizationRepository, OrganizationStats};
pub use resident_repository::ResidentRepository;
pub use user_repository::UserRepository;

/// Database connection pool type
pub type DbPool = Pool<Sqlite>;

/// Initialize the database connection pool and run migrations
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("Invalid database URL: {}", database_url))?
        .create_if_missing(true);

    // Every connection to `:memory:` opens its own empty database
    let in_memory = database_url.contains(":memory:");
    let mut pool_options = SqlitePoolOptions::new().max_connections(if in_memory {
        1
    } else {
        max_connections.max(1)
    });
    if in_memory {
        pool_options = pool_options
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = pool_options
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}

/// Lightweight connectivity check for health endpoints
pub async fn ping(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .context("Database ping failed")?;
    Ok(())
}

/// Render a timestamp in the fixed-width form stored in every table
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(ts: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Unparseable timestamp in database: {}", ts))?;
    Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
}

pub(crate) fn parse_optional_timestamp(ts: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    ts.map(parse_timestamp).transpose()
}

pub(crate) fn parse_optional_date(date: Option<&str>) -> Result<Option<NaiveDate>> {
    date.map(|d| {
        NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .with_context(|| format!("Unparseable date in database: {}", d))
    })
    .transpose()
}

pub(crate) fn parse_uuid(value: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(value).with_context(|| format!("Invalid UUID in database: {}", value))
}

#[cfg(test)]
pub(crate) async fn test_pool() -> DbPool {
    init_pool("sqlite::memory:", 1)
        .await
        .expect("in-memory database")
}
