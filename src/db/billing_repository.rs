//! Processed billing event ids, so redelivered webhooks are applied once

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use uuid::Uuid;

use super::timestamp;

pub struct BillingRepository;

impl BillingRepository {
    /// Record an event id inside the transaction that applies it; returns
    /// `false` if it was already processed.
    ///
    /// Rolling back the transaction forgets the id, so the event can be
    /// delivered again.
    pub async fn mark_processed(
        tx: &mut Transaction<'_, Sqlite>,
        event_id: &str,
        organization_id: Uuid,
        event_type: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO billing_events (event_id, organization_id, event_type, processed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .bind(organization_id.to_string())
        .bind(event_type)
        .bind(timestamp(Utc::now()))
        .execute(&mut **tx)
        .await
        .context("Failed to record billing event")?;

        Ok(result.rows_affected() == 1)
    }
}
