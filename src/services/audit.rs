//! Audit ledger
//!
//! Appends are serialized so each event links to the true chain head. Normal
//! recording is best-effort: a failed write is logged and counted but never
//! blocks the response. Emergency actions use [`AuditLedger::record_strict`],
//! which must succeed before the action runs.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::db::{AuditRepository, DbPool};
use crate::models::{AuditEvent, AuditLogQuery, AuditOutcome, ChainVerification, NewAuditEvent, RiskLevel};
use crate::utils::{AppError, AppResult};

pub struct AuditLedger {
    pool: DbPool,
    append_lock: Mutex<()>,
    write_failures: AtomicU64,
}

impl AuditLedger {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            append_lock: Mutex::new(()),
            write_failures: AtomicU64::new(0),
        }
    }

    async fn append(&self, event: &NewAuditEvent) -> anyhow::Result<AuditEvent> {
        let _guard = self.append_lock.lock().await;
        AuditRepository::new(&self.pool).append(event).await
    }

    /// Best-effort append
    pub async fn record(&self, event: NewAuditEvent) {
        trace_event(&event);
        if let Err(e) = self.append(&event).await {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                action = %event.action,
                risk = event.risk.as_str(),
                error = %e,
                "Failed to write audit event"
            );
        }
    }

    /// Append that must succeed; used ahead of emergency actions
    pub async fn record_strict(&self, event: NewAuditEvent) -> AppResult<AuditEvent> {
        trace_event(&event);
        self.append(&event).await.map_err(|e| {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            error!(action = %event.action, error = %e, "Failed to write audit event");
            AppError::Internal("Audit sink unavailable".to_string())
        })
    }

    /// Number of failed writes since startup
    pub fn write_failures(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    pub async fn list(&self, query: &AuditLogQuery) -> AppResult<Vec<AuditEvent>> {
        Ok(AuditRepository::new(&self.pool).list(query).await?)
    }

    pub async fn verify_chain(&self) -> AppResult<ChainVerification> {
        let _guard = self.append_lock.lock().await;
        Ok(AuditRepository::new(&self.pool).verify_chain().await?)
    }

    /// Events whose action starts with `action_prefix` since `since`
    pub async fn count_since(
        &self,
        action_prefix: &str,
        outcome: AuditOutcome,
        since: chrono::DateTime<chrono::Utc>,
    ) -> AppResult<i64> {
        Ok(AuditRepository::new(&self.pool)
            .count_since(action_prefix, outcome, since)
            .await?)
    }
}

fn trace_event(event: &NewAuditEvent) {
    let actor = event.actor_id.map(|id| id.to_string());
    let org = event.organization_id.map(|id| id.to_string());
    match (event.outcome, event.risk) {
        (AuditOutcome::Failure, RiskLevel::High | RiskLevel::Critical) => warn!(
            action = %event.action,
            resource = %event.resource,
            user_id = actor.as_deref().unwrap_or("system"),
            organization_id = org.as_deref().unwrap_or("-"),
            risk = event.risk.as_str(),
            "Security event"
        ),
        _ => info!(
            action = %event.action,
            resource = %event.resource,
            user_id = actor.as_deref().unwrap_or("system"),
            organization_id = org.as_deref().unwrap_or("-"),
            outcome = event.outcome.as_str(),
            risk = event.risk.as_str(),
            "Audit event"
        ),
    }
}
