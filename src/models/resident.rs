//! Resident and property records
//!
//! Only the fields needed to exercise quota and field-projection rules live here;
//! the wider case-management record set belongs to the business modules.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Stored resident, every field class present
#[derive(Debug, Clone, PartialEq)]
pub struct Resident {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub property_id: Option<Uuid>,
    // basic
    pub first_name: String,
    pub last_name: String,
    pub move_in_date: Option<NaiveDate>,
    // resident-sensitive
    pub date_of_birth: Option<NaiveDate>,
    pub support_needs: Option<String>,
    pub risk_notes: Option<String>,
    // financial
    pub benefit_reference: Option<String>,
    pub rent_arrears_pence: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateResidentRequest {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    pub property_id: Option<Uuid>,
    pub move_in_date: Option<NaiveDate>,
    pub date_of_birth: Option<NaiveDate>,
    #[validate(length(max = 4000))]
    pub support_needs: Option<String>,
    #[validate(length(max = 4000))]
    pub risk_notes: Option<String>,
    #[validate(length(max = 64))]
    pub benefit_reference: Option<String>,
    pub rent_arrears_pence: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePropertyRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 500))]
    pub address: Option<String>,
}

/// Optional organization selector accepted by tenant-scoped routes
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationScopeQuery {
    pub organization_id: Option<Uuid>,
}
