//! Business logic services

pub mod audit;
pub mod auth;
pub mod billing;
pub mod entitlements;
pub mod notifier;
pub mod platform;
pub mod projection;
pub mod rbac;
pub mod sso;
pub mod tenant;
pub mod token;
pub mod totp;

pub use audit::AuditLedger;
pub use auth::{AuthService, LoginOutcome, Session};
pub use billing::{BillingOutcome, BillingService};
pub use entitlements::{EntitlementService, Entitlements};
pub use notifier::{LogResetNotifier, RecordingResetNotifier, ResetNotifier};
pub use platform::{EmergencyAction, EmergencyAuthorization, PlatformOverview, PlatformService};
pub use projection::{project_resident, ResidentView};
pub use sso::{ExternalIdentity, IdentityProvider, OidcProvider, RoleMapper, SsoCredential, SsoRegistry};
pub use tenant::TenantResolver;
pub use token::TokenService;
