//! Role-Based Access Control (RBAC) models
//!
//! Roles and permissions are static data. Each role maps to an explicitly
//! enumerated permission set; nothing is inherited at runtime. The only ordering
//! between roles is the tenant seniority hierarchy returned by [`Role::seniority`].

use serde::{Deserialize, Serialize};

/// A role held by a user, either within an organization or at platform level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Front-line staff, lowest privilege and the fail-safe default
    Staff,
    /// Key workers handling residents' support plans
    SupportWorker,
    /// Scheme or house manager
    Manager,
    /// Organization administrator
    Admin,
    /// Organization owner (billing contact)
    Owner,
    /// Platform operator; lives outside the tenant model
    PlatformAdmin,
}

impl Role {
    /// Get all roles
    pub fn all() -> [Role; 6] {
        [
            Role::Staff,
            Role::SupportWorker,
            Role::Manager,
            Role::Admin,
            Role::Owner,
            Role::PlatformAdmin,
        ]
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::SupportWorker => "support_worker",
            Role::Manager => "manager",
            Role::Admin => "admin",
            Role::Owner => "owner",
            Role::PlatformAdmin => "platform_admin",
        }
    }

    /// Position in the tenant seniority ordering.
    ///
    /// `None` for the platform operator, which is not part of any tenant hierarchy.
    pub fn seniority(&self) -> Option<u8> {
        match self {
            Role::Staff => Some(1),
            Role::SupportWorker => Some(2),
            Role::Manager => Some(3),
            Role::Admin => Some(4),
            Role::Owner => Some(5),
            Role::PlatformAdmin => None,
        }
    }

    /// This role, lowered to `ceiling` when it ranks above it.
    ///
    /// Roles outside the tenant hierarchy are left as they are.
    pub fn capped_at(self, ceiling: Role) -> Role {
        match (self.seniority(), ceiling.seniority()) {
            (Some(have), Some(max)) if have > max => ceiling,
            _ => self,
        }
    }

    pub fn is_platform(&self) -> bool {
        matches!(self, Role::PlatformAdmin)
    }

    /// Explicit permission set for this role
    pub fn permissions(&self) -> &'static [Permission] {
        use Permission::*;
        match self {
            Role::Staff => &[
                ResidentsRead,
                PropertiesRead,
                IncidentsRead,
                IncidentsWrite,
                SupportPlansRead,
            ],
            Role::SupportWorker => &[
                ResidentsRead,
                ResidentsWrite,
                ResidentsSensitiveRead,
                PropertiesRead,
                IncidentsRead,
                IncidentsWrite,
                SupportPlansRead,
                SupportPlansWrite,
            ],
            Role::Manager => &[
                ResidentsRead,
                ResidentsWrite,
                ResidentsSensitiveRead,
                PropertiesRead,
                PropertiesWrite,
                IncidentsRead,
                IncidentsWrite,
                SupportPlansRead,
                SupportPlansWrite,
                InvoicesRead,
                ReportsRead,
            ],
            Role::Admin => &[
                ResidentsRead,
                ResidentsWrite,
                ResidentsSensitiveRead,
                PropertiesRead,
                PropertiesWrite,
                IncidentsRead,
                IncidentsWrite,
                SupportPlansRead,
                SupportPlansWrite,
                InvoicesRead,
                InvoicesWrite,
                ReportsRead,
                UsersManage,
                AuditRead,
            ],
            Role::Owner => &[
                ResidentsRead,
                ResidentsWrite,
                ResidentsSensitiveRead,
                PropertiesRead,
                PropertiesWrite,
                IncidentsRead,
                IncidentsWrite,
                SupportPlansRead,
                SupportPlansWrite,
                InvoicesRead,
                InvoicesWrite,
                ReportsRead,
                UsersManage,
                AuditRead,
                BillingManage,
                OrganizationManage,
            ],
            Role::PlatformAdmin => &[
                PlatformOverview,
                PlatformOrganizationsManage,
                PlatformUsersManage,
                PlatformAuditRead,
            ],
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::all()
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("Invalid role: {}", s))
    }
}

/// Permissions checked by route guards, written as `resource:action`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "residents:read")]
    ResidentsRead,
    #[serde(rename = "residents:write")]
    ResidentsWrite,
    #[serde(rename = "residents:sensitive")]
    ResidentsSensitiveRead,
    #[serde(rename = "properties:read")]
    PropertiesRead,
    #[serde(rename = "properties:write")]
    PropertiesWrite,
    #[serde(rename = "incidents:read")]
    IncidentsRead,
    #[serde(rename = "incidents:write")]
    IncidentsWrite,
    #[serde(rename = "support_plans:read")]
    SupportPlansRead,
    #[serde(rename = "support_plans:write")]
    SupportPlansWrite,
    #[serde(rename = "invoices:read")]
    InvoicesRead,
    #[serde(rename = "invoices:write")]
    InvoicesWrite,
    #[serde(rename = "reports:read")]
    ReportsRead,
    #[serde(rename = "users:manage")]
    UsersManage,
    #[serde(rename = "audit:read")]
    AuditRead,
    #[serde(rename = "billing:manage")]
    BillingManage,
    #[serde(rename = "organization:manage")]
    OrganizationManage,
    #[serde(rename = "platform:overview")]
    PlatformOverview,
    #[serde(rename = "platform:organizations")]
    PlatformOrganizationsManage,
    #[serde(rename = "platform:users")]
    PlatformUsersManage,
    #[serde(rename = "platform:audit")]
    PlatformAuditRead,
}

impl Permission {
    pub fn all() -> Vec<Permission> {
        use Permission::*;
        vec![
            ResidentsRead,
            ResidentsWrite,
            ResidentsSensitiveRead,
            PropertiesRead,
            PropertiesWrite,
            IncidentsRead,
            IncidentsWrite,
            SupportPlansRead,
            SupportPlansWrite,
            InvoicesRead,
            InvoicesWrite,
            ReportsRead,
            UsersManage,
            AuditRead,
            BillingManage,
            OrganizationManage,
            PlatformOverview,
            PlatformOrganizationsManage,
            PlatformUsersManage,
            PlatformAuditRead,
        ]
    }

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        use Permission::*;
        match self {
            ResidentsRead => "residents:read",
            ResidentsWrite => "residents:write",
            ResidentsSensitiveRead => "residents:sensitive",
            PropertiesRead => "properties:read",
            PropertiesWrite => "properties:write",
            IncidentsRead => "incidents:read",
            IncidentsWrite => "incidents:write",
            SupportPlansRead => "support_plans:read",
            SupportPlansWrite => "support_plans:write",
            InvoicesRead => "invoices:read",
            InvoicesWrite => "invoices:write",
            ReportsRead => "reports:read",
            UsersManage => "users:manage",
            AuditRead => "audit:read",
            BillingManage => "billing:manage",
            OrganizationManage => "organization:manage",
            PlatformOverview => "platform:overview",
            PlatformOrganizationsManage => "platform:organizations",
            PlatformUsersManage => "platform:users",
            PlatformAuditRead => "platform:audit",
        }
    }
}

impl std::str::FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::all()
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| format!("Invalid permission: {}", s))
    }
}

/// Classes of resource data with separate read rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// Names, placement, dates
    Basic,
    /// Support needs, risk notes, health information
    ResidentSensitive,
    /// Benefit references, arrears, invoices
    Financial,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Basic => "basic",
            ResourceClass::ResidentSensitive => "resident_sensitive",
            ResourceClass::Financial => "financial",
        }
    }

    /// Permission that unlocks reading this class of data
    pub fn read_permission(&self) -> Permission {
        match self {
            ResourceClass::Basic => Permission::ResidentsRead,
            ResourceClass::ResidentSensitive => Permission::ResidentsSensitiveRead,
            ResourceClass::Financial => Permission::InvoicesRead,
        }
    }

    /// Whether successful reads of this class are audited
    pub fn is_audited(&self) -> bool {
        !matches!(self, ResourceClass::Basic)
    }
}
