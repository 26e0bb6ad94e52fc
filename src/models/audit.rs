//! Audit event models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            _ => Err(format!("Invalid risk level: {}", s)),
        }
    }
}

/// An event about to be appended to the ledger
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    /// User id, or `None` for system-originated events
    pub actor_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    pub risk: RiskLevel,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
}

impl NewAuditEvent {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            actor_id: None,
            organization_id: None,
            action: action.into(),
            resource: resource.into(),
            outcome: AuditOutcome::Success,
            risk: RiskLevel::Low,
            metadata: serde_json::Value::Null,
            ip_address: None,
        }
    }

    pub fn actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn organization(mut self, organization_id: Option<Uuid>) -> Self {
        self.organization_id = organization_id;
        self
    }

    pub fn failure(mut self) -> Self {
        self.outcome = AuditOutcome::Failure;
        self
    }

    pub fn risk(mut self, risk: RiskLevel) -> Self {
        self.risk = risk;
        self
    }

    pub fn metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn ip(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }
}

/// A stored audit event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    /// User id or `"system"`
    pub actor: String,
    pub organization_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub outcome: AuditOutcome,
    pub risk: RiskLevel,
    pub metadata: serde_json::Value,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogQuery {
    pub organization_id: Option<Uuid>,
    pub action: Option<String>,
    pub min_risk: Option<RiskLevel>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Result of recomputing the hash chain
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    pub events_checked: u64,
    /// First event whose hash or link does not match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<Uuid>,
}
