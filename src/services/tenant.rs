//! Tenant context resolver
//!
//! Read-only. Builds the claim bundle for a user from their active memberships.

use chrono::Utc;
use uuid::Uuid;

use crate::db::{DbPool, OrganizationRepository, UserRepository};
use crate::models::{AuthProvider, OrganizationClaim, Role, TenantContext};
use crate::services::Entitlements;
use crate::utils::AppResult;

pub struct TenantResolver {
    pool: DbPool,
}

impl TenantResolver {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Resolve the tenant context for a user.
    ///
    /// `None` means the user cannot act in any tenant: unknown, deactivated, or
    /// without an active membership. Platform operators resolve to a context with
    /// no organization.
    pub async fn resolve(&self, user_id: Uuid) -> AppResult<Option<TenantContext>> {
        let Some(identity) = UserRepository::new(&self.pool).get_by_id(user_id).await? else {
            return Ok(None);
        };
        if !identity.is_active {
            return Ok(None);
        }

        if identity.role.is_platform() {
            return Ok(Some(TenantContext {
                user_id: identity.id,
                email: identity.email,
                role: identity.role,
                mfa_enabled: identity.mfa_enabled,
                primary_organization_id: None,
                organization_name: None,
                subscription_tier: None,
                subscription_status: None,
                features: Default::default(),
                organizations: Vec::new(),
            }));
        }

        let orgs = OrganizationRepository::new(&self.pool);
        // ordered is_primary desc, created_at asc: the first row is the primary
        let memberships = orgs.active_memberships(user_id).await?;
        let Some(primary) = memberships.first() else {
            return Ok(None);
        };
        let Some(organization) = orgs.get_by_id(primary.organization_id).await? else {
            return Ok(None);
        };
        let entitlements = Entitlements::evaluate(&organization, Utc::now());

        // an SSO identity never holds more than its provider groups map to
        let effective_role = |role: Role| match identity.auth_provider {
            AuthProvider::Sso => role.capped_at(identity.role),
            _ => role,
        };

        let organizations = memberships
            .iter()
            .map(|m| OrganizationClaim {
                organization_id: m.organization_id,
                organization_name: m.organization_name.clone(),
                role: effective_role(m.role),
                is_primary: m.organization_id == primary.organization_id,
            })
            .collect();

        Ok(Some(TenantContext {
            user_id: identity.id,
            email: identity.email,
            role: effective_role(primary.role),
            mfa_enabled: identity.mfa_enabled,
            primary_organization_id: Some(organization.id),
            organization_name: Some(organization.name),
            subscription_tier: Some(entitlements.tier),
            subscription_status: Some(entitlements.status),
            features: entitlements.features,
            organizations,
        }))
    }
}
