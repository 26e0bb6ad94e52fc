//! Per-role field projection for resident records
//!
//! Each field class is included only when the role holds that class's read
//! permission. The decision is made before serialization; withheld classes are
//! never part of the view.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{ResourceClass, Resident, Role};
use crate::services::rbac::has_permission;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SensitiveFields {
    pub date_of_birth: Option<NaiveDate>,
    pub support_needs: Option<String>,
    pub risk_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinancialFields {
    pub benefit_reference: Option<String>,
    pub rent_arrears_pence: Option<i64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResidentView {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub property_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub move_in_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sensitive: Option<SensitiveFields>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub financial: Option<FinancialFields>,
}

/// Field classes a role may read, in projection order
pub fn visible_classes(role: Role) -> Vec<ResourceClass> {
    [ResourceClass::Basic, ResourceClass::ResidentSensitive, ResourceClass::Financial]
        .into_iter()
        .filter(|class| has_permission(role, class.read_permission()))
        .collect()
}

pub fn project_resident(resident: &Resident, role: Role) -> ResidentView {
    let classes = visible_classes(role);
    let sensitive = classes
        .contains(&ResourceClass::ResidentSensitive)
        .then(|| SensitiveFields {
            date_of_birth: resident.date_of_birth,
            support_needs: resident.support_needs.clone(),
            risk_notes: resident.risk_notes.clone(),
        });
    let financial = classes
        .contains(&ResourceClass::Financial)
        .then(|| FinancialFields {
            benefit_reference: resident.benefit_reference.clone(),
            rent_arrears_pence: resident.rent_arrears_pence,
        });

    ResidentView {
        id: resident.id,
        organization_id: resident.organization_id,
        property_id: resident.property_id,
        first_name: resident.first_name.clone(),
        last_name: resident.last_name.clone(),
        move_in_date: resident.move_in_date,
        created_at: resident.created_at,
        sensitive,
        financial,
    }
}
