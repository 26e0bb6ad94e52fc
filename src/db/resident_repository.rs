//! Resident and property repository
//!
//! Every query is scoped by organization id. Creation reserves quota and inserts
//! in one transaction.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{parse_optional_date, parse_timestamp, parse_uuid, timestamp, OrganizationRepository};
use crate::models::{CreatePropertyRequest, CreateResidentRequest, Property, Resident, ResourceKind};

#[derive(Debug, sqlx::FromRow)]
struct ResidentRow {
    id: String,
    organization_id: String,
    property_id: Option<String>,
    first_name: String,
    last_name: String,
    move_in_date: Option<String>,
    date_of_birth: Option<String>,
    support_needs: Option<String>,
    risk_notes: Option<String>,
    benefit_reference: Option<String>,
    rent_arrears_pence: Option<i64>,
    created_at: String,
}

#[derive(Debug, sqlx::FromRow)]
struct PropertyRow {
    id: String,
    organization_id: String,
    name: String,
    address: Option<String>,
    created_at: String,
}

const RESIDENT_COLUMNS: &str = "id, organization_id, property_id, first_name, last_name, \
     move_in_date, date_of_birth, support_needs, risk_notes, benefit_reference, \
     rent_arrears_pence, created_at";

pub struct ResidentRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> ResidentRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a resident if the organization still has room; `None` when full
    pub async fn create(
        &self,
        organization_id: Uuid,
        req: &CreateResidentRequest,
    ) -> Result<Option<Resident>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        if !OrganizationRepository::reserve_usage(&mut tx, organization_id, ResourceKind::Residents)
            .await?
        {
            tx.rollback().await.ok();
            return Ok(None);
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO residents (id, organization_id, property_id, first_name, last_name,
                                   move_in_date, date_of_birth, support_needs, risk_notes,
                                   benefit_reference, rent_arrears_pence, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .bind(req.property_id.map(|p| p.to_string()))
        .bind(&req.first_name)
        .bind(&req.last_name)
        .bind(req.move_in_date.map(|d| d.to_string()))
        .bind(req.date_of_birth.map(|d| d.to_string()))
        .bind(req.support_needs.as_deref())
        .bind(req.risk_notes.as_deref())
        .bind(req.benefit_reference.as_deref())
        .bind(req.rent_arrears_pence)
        .bind(timestamp(Utc::now()))
        .execute(&mut *tx)
        .await
        .context("Failed to create resident")?;

        tx.commit().await.context("Failed to commit resident")?;

        self.get(organization_id, id).await
    }

    pub async fn get(&self, organization_id: Uuid, id: Uuid) -> Result<Option<Resident>> {
        let sql = format!(
            "SELECT {} FROM residents WHERE organization_id = ? AND id = ?",
            RESIDENT_COLUMNS
        );
        let row = sqlx::query_as::<_, ResidentRow>(&sql)
            .bind(organization_id.to_string())
            .bind(id.to_string())
            .fetch_optional(self.pool)
            .await
            .context("Failed to get resident")?;

        row.map(row_to_resident).transpose()
    }

    pub async fn list(&self, organization_id: Uuid) -> Result<Vec<Resident>> {
        let sql = format!(
            "SELECT {} FROM residents WHERE organization_id = ? ORDER BY last_name, first_name",
            RESIDENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, ResidentRow>(&sql)
            .bind(organization_id.to_string())
            .fetch_all(self.pool)
            .await
            .context("Failed to list residents")?;

        rows.into_iter().map(row_to_resident).collect()
    }

    /// Create a property if the organization still has room; `None` when full
    pub async fn create_property(
        &self,
        organization_id: Uuid,
        req: &CreatePropertyRequest,
    ) -> Result<Option<Property>> {
        let mut tx = self.pool.begin().await.context("Failed to begin transaction")?;

        if !OrganizationRepository::reserve_usage(&mut tx, organization_id, ResourceKind::Properties)
            .await?
        {
            tx.rollback().await.ok();
            return Ok(None);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO properties (id, organization_id, name, address, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(organization_id.to_string())
        .bind(&req.name)
        .bind(req.address.as_deref())
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await
        .context("Failed to create property")?;

        tx.commit().await.context("Failed to commit property")?;

        Ok(Some(Property {
            id,
            organization_id,
            name: req.name.clone(),
            address: req.address.clone(),
            created_at: now,
        }))
    }

    pub async fn list_properties(&self, organization_id: Uuid) -> Result<Vec<Property>> {
        let rows = sqlx::query_as::<_, PropertyRow>(
            r#"
            SELECT id, organization_id, name, address, created_at
            FROM properties
            WHERE organization_id = ?
            ORDER BY name
            "#,
        )
        .bind(organization_id.to_string())
        .fetch_all(self.pool)
        .await
        .context("Failed to list properties")?;

        rows.into_iter()
            .map(|row| {
                Ok(Property {
                    id: parse_uuid(&row.id)?,
                    organization_id: parse_uuid(&row.organization_id)?,
                    name: row.name,
                    address: row.address,
                    created_at: parse_timestamp(&row.created_at)?,
                })
            })
            .collect()
    }
}

fn row_to_resident(row: ResidentRow) -> Result<Resident> {
    Ok(Resident {
        id: parse_uuid(&row.id)?,
        organization_id: parse_uuid(&row.organization_id)?,
        property_id: row.property_id.as_deref().map(parse_uuid).transpose()?,
        first_name: row.first_name,
        last_name: row.last_name,
        move_in_date: parse_optional_date(row.move_in_date.as_deref())?,
        date_of_birth: parse_optional_date(row.date_of_birth.as_deref())?,
        support_needs: row.support_needs,
        risk_notes: row.risk_notes,
        benefit_reference: row.benefit_reference,
        rent_arrears_pence: row.rent_arrears_pence,
        created_at: parse_timestamp(&row.created_at)?,
    })
}
