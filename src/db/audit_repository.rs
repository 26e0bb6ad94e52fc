//! Audit log repository
//!
//! Rows are append-only and hash-chained: each row stores the previous row's
//! hash and `sha256(prev_hash | canonical fields)`.

use anyhow::{Context, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_timestamp, parse_uuid, timestamp};
use crate::models::{
    AuditEvent, AuditLogQuery, AuditOutcome, ChainVerification, NewAuditEvent, RiskLevel,
};

/// `prev_hash` of the first event in the chain
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const AUDIT_COLUMNS: &str = "id, actor, organization_id, action, resource, outcome, risk, \
                             metadata, ip_address, created_at, prev_hash, hash";

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: String,
    actor: String,
    organization_id: Option<String>,
    action: String,
    resource: String,
    outcome: String,
    risk: String,
    metadata: String,
    ip_address: Option<String>,
    created_at: String,
    prev_hash: String,
    hash: String,
}

impl AuditRow {
    fn canonical(&self) -> String {
        [
            self.id.as_str(),
            self.actor.as_str(),
            self.organization_id.as_deref().unwrap_or(""),
            self.action.as_str(),
            self.resource.as_str(),
            self.outcome.as_str(),
            self.risk.as_str(),
            self.metadata.as_str(),
            self.ip_address.as_deref().unwrap_or(""),
            self.created_at.as_str(),
        ]
        .join("|")
    }

    fn compute_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(b"|");
        hasher.update(self.canonical().as_bytes());
        hex::encode(hasher.finalize())
    }
}

pub struct AuditRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> AuditRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Append an event to the chain.
    ///
    /// Callers must serialize appends; the ledger service holds a lock around this.
    pub async fn append(&self, event: &NewAuditEvent) -> Result<AuditEvent> {
        let mut tx = self.pool.begin().await.context("Failed to begin audit write")?;

        let prev: Option<(String,)> =
            sqlx::query_as("SELECT hash FROM audit_log ORDER BY seq DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await
                .context("Failed to read audit chain head")?;

        let mut row = AuditRow {
            id: Uuid::new_v4().to_string(),
            actor: event
                .actor_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "system".to_string()),
            organization_id: event.organization_id.map(|id| id.to_string()),
            action: event.action.clone(),
            resource: event.resource.clone(),
            outcome: event.outcome.as_str().to_string(),
            risk: event.risk.as_str().to_string(),
            metadata: event.metadata.to_string(),
            ip_address: event.ip_address.clone(),
            created_at: timestamp(Utc::now()),
            prev_hash: prev
                .map(|(hash,)| hash)
                .unwrap_or_else(|| GENESIS_HASH.to_string()),
            hash: String::new(),
        };
        row.hash = row.compute_hash();

        sqlx::query(
            r#"
            INSERT INTO audit_log (id, actor, organization_id, action, resource, outcome, risk,
                                   metadata, ip_address, created_at, prev_hash, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.id)
        .bind(&row.actor)
        .bind(row.organization_id.as_deref())
        .bind(&row.action)
        .bind(&row.resource)
        .bind(&row.outcome)
        .bind(&row.risk)
        .bind(&row.metadata)
        .bind(row.ip_address.as_deref())
        .bind(&row.created_at)
        .bind(&row.prev_hash)
        .bind(&row.hash)
        .execute(&mut *tx)
        .await
        .context("Failed to insert audit event")?;

        tx.commit().await.context("Failed to commit audit event")?;

        row_to_audit(row)
    }

    /// Newest first
    pub async fn list(&self, query: &AuditLogQuery) -> Result<Vec<AuditEvent>> {
        let mut sql = format!("SELECT {} FROM audit_log WHERE 1 = 1", AUDIT_COLUMNS);

        if query.organization_id.is_some() {
            sql.push_str(" AND organization_id = ?");
        }
        if query.action.is_some() {
            sql.push_str(" AND action = ?");
        }
        if let Some(min_risk) = query.min_risk {
            // closed set of literals, nothing user-supplied reaches the SQL
            let allowed: Vec<String> = RiskLevel::ALL
                .iter()
                .filter(|r| **r >= min_risk)
                .map(|r| format!("'{}'", r.as_str()))
                .collect();
            sql.push_str(&format!(" AND risk IN ({})", allowed.join(", ")));
        }

        sql.push_str(" ORDER BY seq DESC LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, AuditRow>(&sql);
        if let Some(organization_id) = query.organization_id {
            q = q.bind(organization_id.to_string());
        }
        if let Some(ref action) = query.action {
            q = q.bind(action);
        }
        q = q
            .bind(query.limit.unwrap_or(100).min(1000) as i64)
            .bind(query.offset.unwrap_or(0) as i64);

        let rows = q
            .fetch_all(self.pool)
            .await
            .context("Failed to list audit events")?;

        rows.into_iter().map(row_to_audit).collect()
    }

    /// Recompute every hash and link from the genesis event forward
    pub async fn verify_chain(&self) -> Result<ChainVerification> {
        let sql = format!("SELECT {} FROM audit_log ORDER BY seq ASC", AUDIT_COLUMNS);
        let rows = sqlx::query_as::<_, AuditRow>(&sql)
            .fetch_all(self.pool)
            .await
            .context("Failed to read audit chain")?;

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut checked = 0u64;
        for row in rows {
            checked += 1;
            if row.prev_hash != expected_prev || row.compute_hash() != row.hash {
                return Ok(ChainVerification {
                    valid: false,
                    events_checked: checked,
                    broken_at: Uuid::parse_str(&row.id).ok(),
                });
            }
            expected_prev = row.hash;
        }

        Ok(ChainVerification {
            valid: true,
            events_checked: checked,
            broken_at: None,
        })
    }

    /// Count events by action prefix and outcome since a point in time
    pub async fn count_since(
        &self,
        action_prefix: &str,
        outcome: AuditOutcome,
        since: chrono::DateTime<Utc>,
    ) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM audit_log WHERE action LIKE ? AND outcome = ? AND created_at >= ?",
        )
        .bind(format!("{}%", action_prefix))
        .bind(outcome.as_str())
        .bind(timestamp(since))
        .fetch_one(self.pool)
        .await
        .context("Failed to count audit events")?;
        Ok(count)
    }
}

fn row_to_audit(row: AuditRow) -> Result<AuditEvent> {
    Ok(AuditEvent {
        id: parse_uuid(&row.id)?,
        actor: row.actor,
        organization_id: row.organization_id.as_deref().map(parse_uuid).transpose()?,
        action: row.action,
        resource: row.resource,
        outcome: if row.outcome == "success" {
            AuditOutcome::Success
        } else {
            AuditOutcome::Failure
        },
        risk: row.risk.parse().map_err(anyhow::Error::msg)?,
        metadata: serde_json::from_str(&row.metadata).unwrap_or(serde_json::Value::Null),
        ip_address: row.ip_address,
        created_at: parse_timestamp(&row.created_at)?,
        prev_hash: row.prev_hash,
        hash: row.hash,
    })
}
