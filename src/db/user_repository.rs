//! Identity repository (credential store)
//!
//! Lockout and MFA-failure counters are only ever changed by single `UPDATE ...
//! RETURNING` statements so concurrent failures from the same account cannot
//! lose increments.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, timestamp};
use crate::models::{AuthProvider, Identity, LockoutRecord, NewIdentity, Role};

const USER_COLUMNS: &str = r#"
    id, email, password_hash, role, mfa_secret, mfa_enabled,
    failed_login_attempts, last_failed_login_at, locked_until,
    mfa_failed_attempts, mfa_last_failed_at, mfa_locked_until,
    force_password_change, is_verified, is_active, auth_provider, external_id,
    last_login_at, created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: Option<String>,
    role: String,
    mfa_secret: Option<String>,
    mfa_enabled: bool,
    failed_login_attempts: i64,
    last_failed_login_at: Option<String>,
    locked_until: Option<String>,
    mfa_failed_attempts: i64,
    mfa_last_failed_at: Option<String>,
    mfa_locked_until: Option<String>,
    force_password_change: bool,
    is_verified: bool,
    is_active: bool,
    auth_provider: String,
    external_id: Option<String>,
    last_login_at: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct LockoutRow {
    attempts: i64,
    last_failed_at: Option<String>,
    locked_until: Option<String>,
}

/// Which failure counter to touch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCounter {
    /// Primary credential (password) failures
    Password,
    /// Second-factor failures
    Mfa,
}

impl FailureCounter {
    fn columns(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            FailureCounter::Password => (
                "failed_login_attempts",
                "last_failed_login_at",
                "locked_until",
            ),
            FailureCounter::Mfa => ("mfa_failed_attempts", "mfa_last_failed_at", "mfa_locked_until"),
        }
    }
}

/// Thresholds applied by [`UserRepository::record_failure`]
#[derive(Debug, Clone, Copy)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub lock_duration: Duration,
}

pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Identity>> {
        let sql = format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(self.pool)
            .await
            .context("Failed to get user")?;

        row.map(row_to_identity).transpose()
    }

    /// Look up by normalized email
    pub async fn get_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let sql = format!("SELECT {} FROM users WHERE email = ?", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(self.pool)
            .await
            .context("Failed to get user by email")?;

        row.map(row_to_identity).transpose()
    }

    pub async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Identity>> {
        let sql = format!("SELECT {} FROM users WHERE external_id = ?", USER_COLUMNS);
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(external_id)
            .fetch_optional(self.pool)
            .await
            .context("Failed to get user by external id")?;

        row.map(row_to_identity).transpose()
    }

    pub async fn create(&self, new: &NewIdentity) -> Result<Identity> {
        let id = Uuid::new_v4();
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, role, auth_provider, external_id,
                               is_verified, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&new.email)
        .bind(new.password_hash.as_deref())
        .bind(new.role.as_str())
        .bind(new.auth_provider.as_str())
        .bind(new.external_id.as_deref())
        .bind(new.is_verified)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await
        .context("Failed to create user")?;

        self.get_by_id(id)
            .await?
            .context("Failed to retrieve created user")
    }

    /// Count one failed attempt and lock the account once the threshold is reached.
    ///
    /// The counter restarts at 1 when the previous failure fell outside the window
    /// or an earlier lock has already expired.
    pub async fn record_failure(
        &self,
        id: Uuid,
        counter: FailureCounter,
        policy: LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<LockoutRecord> {
        let (attempts, last_failed, locked_until) = counter.columns();
        let next_count = format!(
            "CASE WHEN {last} IS NULL OR {last} < ?2 OR ({locked} IS NOT NULL AND {locked} <= ?1) \
             THEN 1 ELSE {attempts} + 1 END",
            last = last_failed,
            locked = locked_until,
            attempts = attempts,
        );
        let sql = format!(
            r#"
            UPDATE users SET
                {attempts} = {next},
                {locked} = CASE
                    WHEN {next} >= ?3 THEN ?4
                    WHEN {locked} IS NOT NULL AND {locked} <= ?1 THEN NULL
                    ELSE {locked}
                END,
                {last} = ?1,
                updated_at = ?1
            WHERE id = ?5
            RETURNING {attempts} AS attempts, {last} AS last_failed_at, {locked} AS locked_until
            "#,
            attempts = attempts,
            next = next_count,
            locked = locked_until,
            last = last_failed,
        );

        let row = sqlx::query_as::<_, LockoutRow>(&sql)
            .bind(timestamp(now))
            .bind(timestamp(now - policy.window))
            .bind(policy.max_attempts as i64)
            .bind(timestamp(now + policy.lock_duration))
            .bind(id.to_string())
            .fetch_one(self.pool)
            .await
            .context("Failed to record failed attempt")?;

        Ok(LockoutRecord {
            failed_attempts: row.attempts,
            last_failed_at: parse_optional_timestamp(row.last_failed_at.as_deref())?,
            locked_until: parse_optional_timestamp(row.locked_until.as_deref())?,
        })
    }

    /// Clear one failure counter and its lock
    pub async fn clear_failures(&self, id: Uuid, counter: FailureCounter) -> Result<()> {
        let (attempts, last_failed, locked_until) = counter.columns();
        let sql = format!(
            "UPDATE users SET {} = 0, {} = NULL, {} = NULL WHERE id = ?",
            attempts, last_failed, locked_until
        );
        sqlx::query(&sql)
            .bind(id.to_string())
            .execute(self.pool)
            .await
            .context("Failed to clear failure counter")?;
        Ok(())
    }

    /// Complete a login: stamp last-login and clear both counters
    pub async fn record_login(&self, id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                failed_login_attempts = 0, last_failed_login_at = NULL, locked_until = NULL,
                mfa_failed_attempts = 0, mfa_last_failed_at = NULL, mfa_locked_until = NULL,
                last_login_at = ?1, updated_at = ?1
            WHERE id = ?2
            "#,
        )
        .bind(timestamp(now))
        .bind(id.to_string())
        .execute(self.pool)
        .await
        .context("Failed to record login")?;
        Ok(())
    }

    /// Store a TOTP secret; `enabled = false` leaves it pending confirmation
    pub async fn set_mfa(&self, id: Uuid, secret: Option<&str>, enabled: bool) -> Result<()> {
        sqlx::query(
            "UPDATE users SET mfa_secret = ?, mfa_enabled = ?, updated_at = ? WHERE id = ?",
        )
        .bind(secret)
        .bind(enabled)
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(self.pool)
        .await
        .context("Failed to update MFA settings")?;
        Ok(())
    }

    /// Replace the password hash, clearing lockout and the force-change flag
    pub async fn set_password(&self, id: Uuid, password_hash: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE users SET
                password_hash = ?1, force_password_change = 0,
                failed_login_attempts = 0, last_failed_login_at = NULL, locked_until = NULL,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(password_hash)
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(self.pool)
        .await
        .context("Failed to update password")?;
        Ok(())
    }

    pub async fn set_force_password_change(&self, id: Uuid, force: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE users SET force_password_change = ?, updated_at = ? WHERE id = ?",
        )
        .bind(force)
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .execute(self.pool)
        .await
        .context("Failed to set force password change")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_role(&self, id: Uuid, role: Role) -> Result<()> {
        sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(timestamp(Utc::now()))
            .bind(id.to_string())
            .execute(self.pool)
            .await
            .context("Failed to update role")?;
        Ok(())
    }

    /// Soft-deactivate; identities are never deleted
    pub async fn deactivate(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET is_active = 0, updated_at = ? WHERE id = ?")
            .bind(timestamp(Utc::now()))
            .bind(id.to_string())
            .execute(self.pool)
            .await
            .context("Failed to deactivate user")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn store_reset_token(
        &self,
        user_id: Uuid,
        token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO password_reset_tokens (token_hash, user_id, expires_at, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(token_hash)
        .bind(user_id.to_string())
        .bind(timestamp(expires_at))
        .bind(timestamp(Utc::now()))
        .execute(self.pool)
        .await
        .context("Failed to store password reset token")?;
        Ok(())
    }

    /// Mark a reset token used, returning its user if it was valid and unused
    pub async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Uuid>> {
        let user_id: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE password_reset_tokens SET used_at = ?1
            WHERE token_hash = ?2 AND used_at IS NULL AND expires_at > ?1
            RETURNING user_id
            "#,
        )
        .bind(timestamp(now))
        .bind(token_hash)
        .fetch_optional(self.pool)
        .await
        .context("Failed to consume password reset token")?;

        user_id.map(|(id,)| parse_uuid(&id)).transpose()
    }

    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE is_active = 1")
            .fetch_one(self.pool)
            .await
            .context("Failed to count users")?;
        Ok(count)
    }
}

fn row_to_identity(row: UserRow) -> Result<Identity> {
    Ok(Identity {
        id: parse_uuid(&row.id)?,
        email: row.email,
        password_hash: row.password_hash,
        role: row.role.parse().map_err(anyhow::Error::msg)?,
        mfa_secret: row.mfa_secret,
        mfa_enabled: row.mfa_enabled,
        lockout: LockoutRecord {
            failed_attempts: row.failed_login_attempts,
            last_failed_at: parse_optional_timestamp(row.last_failed_login_at.as_deref())?,
            locked_until: parse_optional_timestamp(row.locked_until.as_deref())?,
        },
        mfa_lockout: LockoutRecord {
            failed_attempts: row.mfa_failed_attempts,
            last_failed_at: parse_optional_timestamp(row.mfa_last_failed_at.as_deref())?,
            locked_until: parse_optional_timestamp(row.mfa_locked_until.as_deref())?,
        },
        force_password_change: row.force_password_change,
        is_verified: row.is_verified,
        is_active: row.is_active,
        auth_provider: row
            .auth_provider
            .parse::<AuthProvider>()
            .map_err(anyhow::Error::msg)?,
        external_id: row.external_id,
        last_login_at: parse_optional_timestamp(row.last_login_at.as_deref())?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}
