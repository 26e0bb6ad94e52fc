//! Platform-operator console
//!
//! Cross-tenant aggregates and emergency actions. Requests reach this service
//! only after the platform gate (role, MFA, IP allow-list). Emergency actions
//! are pre-authorized and written to the audit chain before they execute.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::db::{DbPool, OrganizationRepository, OrganizationStats, UserRepository};
use crate::models::{AuditOutcome, Claims, NewAuditEvent, RiskLevel, SubscriptionStatus};
use crate::services::AuditLedger;
use crate::utils::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmergencyAction {
    DisableOrganization(Uuid),
    ForcePasswordReset(Uuid),
}

impl EmergencyAction {
    fn name(&self) -> &'static str {
        match self {
            EmergencyAction::DisableOrganization(_) => "platform.organization.disable",
            EmergencyAction::ForcePasswordReset(_) => "platform.user.force_password_reset",
        }
    }

    fn resource(&self) -> String {
        match self {
            EmergencyAction::DisableOrganization(id) => format!("organization:{}", id),
            EmergencyAction::ForcePasswordReset(id) => format!("user:{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmergencyAuthorization {
    pub authorized: bool,
    pub reason: String,
}

impl EmergencyAuthorization {
    fn allow(reason: impl Into<String>) -> Self {
        Self { authorized: true, reason: reason.into() }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { authorized: false, reason: reason.into() }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformOverview {
    pub organizations: OrganizationStats,
    pub active_users: i64,
    pub failed_logins_24h: i64,
    pub audit_write_failures: u64,
}

pub struct PlatformService {
    pool: DbPool,
    audit: Arc<AuditLedger>,
}

impl PlatformService {
    pub fn new(pool: DbPool, audit: Arc<AuditLedger>) -> Self {
        Self { pool, audit }
    }

    pub async fn overview(&self) -> AppResult<PlatformOverview> {
        let organizations = OrganizationRepository::new(&self.pool).stats().await?;
        let active_users = UserRepository::new(&self.pool).count().await?;
        let failed_logins_24h = self
            .audit
            .count_since("auth.login", AuditOutcome::Failure, Utc::now() - Duration::hours(24))
            .await?;

        Ok(PlatformOverview {
            organizations,
            active_users,
            failed_logins_24h,
            audit_write_failures: self.audit.write_failures(),
        })
    }

    /// Decide whether an emergency action may run; performs no writes
    pub async fn authorize_emergency(
        &self,
        actor: &Claims,
        action: EmergencyAction,
    ) -> AppResult<EmergencyAuthorization> {
        if !actor.role.is_platform() {
            return Ok(EmergencyAuthorization::deny("Platform administrator role required"));
        }
        if !actor.mfa_enabled {
            return Ok(EmergencyAuthorization::deny("MFA must be enabled for emergency actions"));
        }

        let decision = match action {
            EmergencyAction::DisableOrganization(id) => {
                match OrganizationRepository::new(&self.pool).get_by_id(id).await? {
                    None => EmergencyAuthorization::deny("Organization not found"),
                    Some(org) if !org.subscription_status.can_transition_to(SubscriptionStatus::Paused) => {
                        EmergencyAuthorization::deny(format!(
                            "Organization cannot be paused from status '{}'",
                            org.subscription_status
                        ))
                    }
                    Some(_) => EmergencyAuthorization::allow("Organization can be paused"),
                }
            }
            EmergencyAction::ForcePasswordReset(id) => {
                match UserRepository::new(&self.pool).get_by_id(id).await? {
                    None => EmergencyAuthorization::deny("User not found"),
                    Some(user) if !user.is_active => EmergencyAuthorization::deny("User is deactivated"),
                    Some(user) if user.password_hash.is_none() => {
                        EmergencyAuthorization::deny("User signs in through SSO only")
                    }
                    Some(_) if id == actor.user_id => {
                        EmergencyAuthorization::deny("Operators cannot force-reset their own password")
                    }
                    Some(_) => EmergencyAuthorization::allow("User can be forced to reset"),
                }
            }
        };
        Ok(decision)
    }

    /// Pause an organization's subscription
    pub async fn disable_organization(
        &self,
        actor: &Claims,
        organization_id: Uuid,
        reason: Option<String>,
        ip: Option<String>,
    ) -> AppResult<EmergencyAuthorization> {
        let action = EmergencyAction::DisableOrganization(organization_id);
        let decision = self.pre_authorize(actor, action, reason.clone(), ip.clone()).await?;

        let orgs = OrganizationRepository::new(&self.pool);
        let current = orgs
            .get_by_id(organization_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Organization not found".to_string()))?
            .subscription_status;
        if !orgs
            .transition_status(organization_id, current, SubscriptionStatus::Paused, None)
            .await?
        {
            return Err(AppError::BadRequest("Organization status changed concurrently".to_string()));
        }

        self.record_completion(actor, action, Some(organization_id), ip).await;
        Ok(decision)
    }

    /// Require a password change at the user's next login
    pub async fn force_password_reset(
        &self,
        actor: &Claims,
        user_id: Uuid,
        reason: Option<String>,
        ip: Option<String>,
    ) -> AppResult<EmergencyAuthorization> {
        let action = EmergencyAction::ForcePasswordReset(user_id);
        let decision = self.pre_authorize(actor, action, reason, ip.clone()).await?;

        if !UserRepository::new(&self.pool)
            .set_force_password_change(user_id, true)
            .await?
        {
            return Err(AppError::NotFound("User not found".to_string()));
        }

        self.record_completion(actor, action, None, ip).await;
        Ok(decision)
    }

    /// Authorize, then write the intent to the audit chain before anything changes
    async fn pre_authorize(
        &self,
        actor: &Claims,
        action: EmergencyAction,
        reason: Option<String>,
        ip: Option<String>,
    ) -> AppResult<EmergencyAuthorization> {
        let decision = self.authorize_emergency(actor, action).await?;
        if !decision.authorized {
            warn!(user_id = %actor.user_id, action = action.name(), reason = %decision.reason, "Emergency action denied");
            self.audit
                .record(
                    NewAuditEvent::new(action.name(), action.resource())
                        .actor(actor.user_id)
                        .failure()
                        .risk(RiskLevel::High)
                        .metadata(json!({ "reason": decision.reason }))
                        .ip(ip),
                )
                .await;
            return Err(AppError::forbidden(
                "EMERGENCY_ACTION_DENIED",
                decision.reason.clone(),
                [("authorized", json!(false)), ("reason", json!(decision.reason))],
            ));
        }

        self.audit
            .record_strict(
                NewAuditEvent::new(action.name(), action.resource())
                    .actor(actor.user_id)
                    .risk(RiskLevel::Critical)
                    .metadata(json!({ "phase": "intent", "reason": reason }))
                    .ip(ip),
            )
            .await?;
        Ok(decision)
    }

    async fn record_completion(
        &self,
        actor: &Claims,
        action: EmergencyAction,
        organization_id: Option<Uuid>,
        ip: Option<String>,
    ) {
        self.audit
            .record(
                NewAuditEvent::new(action.name(), action.resource())
                    .actor(actor.user_id)
                    .organization(organization_id)
                    .risk(RiskLevel::Critical)
                    .metadata(json!({ "phase": "completed" }))
                    .ip(ip),
            )
            .await;
    }
}
