//! Organization (tenant) and membership repository
//!
//! Subscription status changes are compare-and-set on the stored status and
//! usage counters only move through conditional increments.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::{parse_optional_timestamp, parse_timestamp, parse_uuid, timestamp};
use crate::models::{
    Membership, NewMembership, NewOrganization, Organization, ResourceKind, SubscriptionStatus,
    SubscriptionTier,
};

const ORG_COLUMNS: &str = r#"
    id, name, subscription_tier, subscription_status, features,
    max_residents, max_properties, current_residents, current_properties,
    trial_end_date, subscription_end_date, billing_cycle_anchor, created_at, updated_at
"#;

#[derive(Debug, sqlx::FromRow)]
struct OrganizationRow {
    id: String,
    name: String,
    subscription_tier: String,
    subscription_status: String,
    features: String,
    max_residents: i64,
    max_properties: i64,
    current_residents: i64,
    current_properties: i64,
    trial_end_date: Option<String>,
    subscription_end_date: Option<String>,
    billing_cycle_anchor: Option<String>,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct MembershipRow {
    user_id: String,
    organization_id: String,
    organization_name: String,
    role: String,
    is_primary: bool,
    status: String,
    created_at: String,
}

/// Counts shown on the platform console
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_tier: BTreeMap<String, i64>,
    pub total_residents: i64,
    pub total_properties: i64,
}

pub struct OrganizationRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> OrganizationRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Organization>> {
        let sql = format!("SELECT {} FROM organizations WHERE id = ?", ORG_COLUMNS);
        let row = sqlx::query_as::<_, OrganizationRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(self.pool)
            .await
            .context("Failed to get organization")?;

        row.map(row_to_org).transpose()
    }

    pub async fn create(&self, new: &NewOrganization) -> Result<Organization> {
        let id = Uuid::new_v4();
        let now = timestamp(Utc::now());
        let plan = new.subscription_tier.plan();
        let features = new.features.clone().unwrap_or(plan.features);

        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, subscription_tier, subscription_status, features,
                                       max_residents, max_properties, trial_end_date,
                                       subscription_end_date, billing_cycle_anchor,
                                       created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&new.name)
        .bind(new.subscription_tier.as_str())
        .bind(new.subscription_status.as_str())
        .bind(serde_json::to_string(&features)?)
        .bind(new.max_residents.unwrap_or(plan.max_residents))
        .bind(new.max_properties.unwrap_or(plan.max_properties))
        .bind(new.trial_end_date.map(timestamp))
        .bind(new.subscription_end_date.map(timestamp))
        .bind(&now)
        .bind(&now)
        .bind(&now)
        .execute(self.pool)
        .await
        .context("Failed to create organization")?;

        self.get_by_id(id)
            .await?
            .context("Failed to retrieve created organization")
    }

    pub async fn add_membership(&self, new: &NewMembership) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO memberships (user_id, organization_id, role, is_primary, status, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(new.user_id.to_string())
        .bind(new.organization_id.to_string())
        .bind(new.role.as_str())
        .bind(new.is_primary)
        .bind(new.status.as_str())
        .bind(timestamp(Utc::now()))
        .execute(self.pool)
        .await
        .context("Failed to add membership")?;
        Ok(())
    }

    /// Active memberships, primary first, then oldest first
    pub async fn active_memberships(&self, user_id: Uuid) -> Result<Vec<Membership>> {
        let rows = sqlx::query_as::<_, MembershipRow>(
            r#"
            SELECT m.user_id, m.organization_id, o.name AS organization_name, m.role,
                   m.is_primary, m.status, m.created_at
            FROM memberships m
            JOIN organizations o ON o.id = m.organization_id
            WHERE m.user_id = ? AND m.status = 'active'
            ORDER BY m.is_primary DESC, m.created_at ASC, m.organization_id ASC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(self.pool)
        .await
        .context("Failed to list memberships")?;

        rows.into_iter().map(row_to_membership).collect()
    }

    /// Reserve one unit of usage inside a transaction.
    ///
    /// Returns `false` without changing anything when the ceiling is already reached.
    pub async fn reserve_usage(
        tx: &mut Transaction<'_, Sqlite>,
        organization_id: Uuid,
        kind: ResourceKind,
    ) -> Result<bool> {
        let sql = match kind {
            ResourceKind::Residents => {
                "UPDATE organizations SET current_residents = current_residents + 1 \
                 WHERE id = ? AND current_residents < max_residents"
            }
            ResourceKind::Properties => {
                "UPDATE organizations SET current_properties = current_properties + 1 \
                 WHERE id = ? AND current_properties < max_properties"
            }
        };
        let result = sqlx::query(sql)
            .bind(organization_id.to_string())
            .execute(&mut **tx)
            .await
            .context("Failed to reserve usage")?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn release_usage(&self, organization_id: Uuid, kind: ResourceKind) -> Result<()> {
        let sql = match kind {
            ResourceKind::Residents => {
                "UPDATE organizations SET current_residents = current_residents - 1 \
                 WHERE id = ? AND current_residents > 0"
            }
            ResourceKind::Properties => {
                "UPDATE organizations SET current_properties = current_properties - 1 \
                 WHERE id = ? AND current_properties > 0"
            }
        };
        sqlx::query(sql)
            .bind(organization_id.to_string())
            .execute(self.pool)
            .await
            .context("Failed to release usage")?;
        Ok(())
    }

    /// Move the subscription from `from` to `to` if it is still in `from`.
    ///
    /// `period_end`, when given, becomes the new subscription end date.
    pub async fn transition_status(
        &self,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        Self::transition_status_with(self.pool, id, from, to, period_end).await
    }

    /// [`Self::transition_status`] on any executor, typically an open transaction
    pub async fn transition_status_with<'e, E>(
        executor: E,
        id: Uuid,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<bool>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = timestamp(Utc::now());
        let result = sqlx::query(
            r#"
            UPDATE organizations SET
                subscription_status = ?1,
                subscription_end_date = COALESCE(?2, subscription_end_date),
                billing_cycle_anchor = CASE WHEN ?1 = 'active' THEN ?3 ELSE billing_cycle_anchor END,
                updated_at = ?3
            WHERE id = ?4 AND subscription_status = ?5
            "#,
        )
        .bind(to.as_str())
        .bind(period_end.map(timestamp))
        .bind(&now)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(executor)
        .await
        .context("Failed to transition subscription status")?;

        Ok(result.rows_affected() == 1)
    }

    /// Apply a new tier with its plan limits and default features.
    ///
    /// Only applies while the status is still `expected_status`.
    pub async fn change_tier(
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
        tier: SubscriptionTier,
        expected_status: SubscriptionStatus,
    ) -> Result<bool> {
        let plan = tier.plan();
        let result = sqlx::query(
            r#"
            UPDATE organizations SET
                subscription_tier = ?, features = ?, max_residents = ?, max_properties = ?,
                updated_at = ?
            WHERE id = ? AND subscription_status = ?
            "#,
        )
        .bind(tier.as_str())
        .bind(serde_json::to_string(&plan.features)?)
        .bind(plan.max_residents)
        .bind(plan.max_properties)
        .bind(timestamp(Utc::now()))
        .bind(id.to_string())
        .bind(expected_status.as_str())
        .execute(&mut **tx)
        .await
        .context("Failed to change subscription tier")?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn stats(&self) -> Result<OrganizationStats> {
        let by_status: Vec<(String, i64)> = sqlx::query_as(
            "SELECT subscription_status, COUNT(*) FROM organizations GROUP BY subscription_status",
        )
        .fetch_all(self.pool)
        .await
        .context("Failed to count organizations by status")?;

        let by_tier: Vec<(String, i64)> = sqlx::query_as(
            "SELECT subscription_tier, COUNT(*) FROM organizations GROUP BY subscription_tier",
        )
        .fetch_all(self.pool)
        .await
        .context("Failed to count organizations by tier")?;

        let (total_residents, total_properties): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(current_residents), 0), COALESCE(SUM(current_properties), 0) \
             FROM organizations",
        )
        .fetch_one(self.pool)
        .await
        .context("Failed to sum usage")?;

        Ok(OrganizationStats {
            total: by_status.iter().map(|(_, n)| n).sum(),
            by_status: by_status.into_iter().collect(),
            by_tier: by_tier.into_iter().collect(),
            total_residents,
            total_properties,
        })
    }
}

fn row_to_org(row: OrganizationRow) -> Result<Organization> {
    Ok(Organization {
        id: parse_uuid(&row.id)?,
        name: row.name,
        subscription_tier: row
            .subscription_tier
            .parse()
            .map_err(anyhow::Error::msg)?,
        subscription_status: row
            .subscription_status
            .parse()
            .map_err(anyhow::Error::msg)?,
        features: serde_json::from_str(&row.features)
            .context("Invalid feature map in database")?,
        max_residents: row.max_residents,
        max_properties: row.max_properties,
        current_residents: row.current_residents,
        current_properties: row.current_properties,
        trial_end_date: parse_optional_timestamp(row.trial_end_date.as_deref())?,
        subscription_end_date: parse_optional_timestamp(row.subscription_end_date.as_deref())?,
        billing_cycle_anchor: parse_optional_timestamp(row.billing_cycle_anchor.as_deref())?,
        created_at: parse_timestamp(&row.created_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
    })
}

fn row_to_membership(row: MembershipRow) -> Result<Membership> {
    Ok(Membership {
        user_id: parse_uuid(&row.user_id)?,
        organization_id: parse_uuid(&row.organization_id)?,
        organization_name: row.organization_name,
        role: row.role.parse().map_err(anyhow::Error::msg)?,
        is_primary: row.is_primary,
        status: row.status.parse().map_err(anyhow::Error::msg)?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}
