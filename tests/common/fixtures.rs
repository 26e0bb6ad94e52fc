//! Test fixtures for common test data
//!
//! Seeds organizations, identities and memberships straight into the test
//! database and logs users in through the real endpoints.

use std::sync::atomic::{AtomicU32, Ordering};

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use haven_gate::{
    db::{OrganizationRepository, ResidentRepository, UserRepository},
    models::{
        AuditEvent, AuditLogQuery, AuthProvider, CreateResidentRequest, Identity, MembershipStatus, NewIdentity, NewMembership, NewOrganization,
        Organization, Role, SubscriptionStatus, SubscriptionTier,
    },
    services::{totp, AuthService},
};

use super::TestApp;

pub const TEST_PASSWORD: &str = "correct-horse-battery-staple";

impl TestApp {
    /// Create an organization with plan defaults for `tier`
    pub async fn create_organization(
        &self,
        name: &str,
        tier: SubscriptionTier,
        status: SubscriptionStatus,
    ) -> Organization {
        self.create_organization_with(NewOrganization::new(name, tier, status))
            .await
    }

    pub async fn create_organization_with(&self, new: NewOrganization) -> Organization {
        OrganizationRepository::new(&self.state.db)
            .create(&new)
            .await
            .expect("Failed to create organization")
    }

    /// Create a local identity with [`TEST_PASSWORD`]
    pub async fn create_user(&self, email: &str, role: Role) -> Identity {
        let password_hash =
            AuthService::hash_password(TEST_PASSWORD).expect("Failed to hash password");
        UserRepository::new(&self.state.db)
            .create(&NewIdentity {
                email: email.to_string(),
                password_hash: Some(password_hash),
                role,
                auth_provider: AuthProvider::Local,
                external_id: None,
                is_verified: true,
            })
            .await
            .expect("Failed to create user")
    }

    /// Link a user to an organization with an active membership
    pub async fn add_member(&self, user_id: Uuid, organization_id: Uuid, role: Role, is_primary: bool) {
        self.add_member_with_status(user_id, organization_id, role, is_primary, MembershipStatus::Active)
            .await
    }

    pub async fn add_member_with_status(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        role: Role,
        is_primary: bool,
        status: MembershipStatus,
    ) {
        OrganizationRepository::new(&self.state.db)
            .add_membership(&NewMembership {
                user_id,
                organization_id,
                role,
                is_primary,
                status,
            })
            .await
            .expect("Failed to add membership")
    }

    /// Fill `count` resident slots directly through the repository
    pub async fn seed_residents(&self, organization_id: Uuid, count: usize) {
        let repo = ResidentRepository::new(&self.state.db);
        for i in 0..count {
            let request = CreateResidentRequest {
                first_name: format!("Resident{}", i),
                last_name: "Seed".to_string(),
                property_id: None,
                move_in_date: None,
                date_of_birth: None,
                support_needs: None,
                risk_notes: None,
                benefit_reference: None,
                rent_arrears_pence: None,
            };
            repo.create(organization_id, &request)
                .await
                .expect("Failed to seed resident")
                .expect("Organization is already full");
        }
    }

    /// User with a single primary membership
    pub async fn create_member(&self, email: &str, organization_id: Uuid, role: Role) -> Identity {
        let user = self.create_user(email, Role::Staff).await;
        self.add_member(user.id, organization_id, role, true).await;
        user
    }

    /// Turn MFA on directly; returns the base32 secret
    pub async fn enable_mfa(&self, user: &Identity) -> String {
        let (secret, _) =
            totp::generate_enrollment("Haven", &user.email).expect("Failed to generate secret");
        UserRepository::new(&self.state.db)
            .set_mfa(user.id, Some(&secret), true)
            .await
            .expect("Failed to enable MFA");
        secret
    }

    /// Password login; panics unless it yields a token pair.
    ///
    /// Each call comes from a fresh address so seeding several sessions never
    /// trips the per-IP auth limiter.
    pub async fn login(&self, email: &str) -> serde_json::Value {
        let response = self
            .post_json_from(
                "/api/v1/auth/login",
                json!({ "email": email, "password": TEST_PASSWORD }),
                &next_client_ip(),
            )
            .await;
        response.assert_ok();
        response.json()
    }

    /// Access token for a user without MFA
    pub async fn access_token(&self, email: &str) -> String {
        self.login(email).await["accessToken"]
            .as_str()
            .expect("accessToken missing")
            .to_string()
    }

    /// Password login followed by the TOTP step; returns the token pair
    pub async fn mfa_login(&self, email: &str, secret: &str) -> serde_json::Value {
        let challenge = self.login(email).await;
        let mfa_token = challenge["mfaToken"]
            .as_str()
            .expect("mfaToken missing")
            .to_string();

        let response = self
            .post_json_from(
                "/api/v1/auth/mfa/verify",
                json!({ "mfaToken": mfa_token, "code": totp_now(secret, email) }),
                &next_client_ip(),
            )
            .await;
        response.assert_ok();
        response.json()
    }

    /// Platform administrator with MFA enabled; returns the identity and an access token
    pub async fn platform_admin(&self, email: &str) -> (Identity, String) {
        let admin = self.create_user(email, Role::PlatformAdmin).await;
        let secret = self.enable_mfa(&admin).await;
        let token = self.mfa_login(email, &secret).await["accessToken"]
            .as_str()
            .expect("accessToken missing")
            .to_string();
        (admin, token)
    }

    /// Ledger events with the given action, newest first
    pub async fn audit_events(&self, action: &str) -> Vec<AuditEvent> {
        self.state
            .audit
            .list(&AuditLogQuery {
                action: Some(action.to_string()),
                ..AuditLogQuery::default()
            })
            .await
            .expect("Failed to list audit events")
    }
}

/// Distinct client address outside the platform allow-list
pub fn next_client_ip() -> String {
    static NEXT: AtomicU32 = AtomicU32::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    format!("172.16.{}.{}", (n / 250) % 250, n % 250 + 1)
}

/// Current TOTP code for a secret
pub fn totp_now(secret: &str, email: &str) -> String {
    let now = Utc::now().timestamp() as u64;
    totp::generate_code_at(secret, "Haven", email, now).expect("Failed to generate code")
}
