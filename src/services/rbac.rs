//! Role-based access control policies
//!
//! Two role models coexist and stay separate:
//!
//! - an allow-list: the role must be one of a fixed set;
//! - a seniority ordering: `staff < support_worker < manager < admin < owner`.
//!
//! Permission checks are a third, independent policy over the static
//! role → permission table in [`crate::models::rbac`]. The guard chain
//! composes these; none of them consult the others.

use crate::models::{Permission, Role};

/// Allow-list policy: `role` must be one of `allowed`
pub fn role_allowed(role: Role, allowed: &[Role]) -> bool {
    allowed.contains(&role)
}

/// Seniority policy: `role` must rank at or above `minimum`.
///
/// `platform_admin` sits outside the tenant hierarchy and never satisfies it.
pub fn role_at_least(role: Role, minimum: Role) -> bool {
    match (role.seniority(), minimum.seniority()) {
        (Some(have), Some(need)) => have >= need,
        _ => false,
    }
}

/// Permission policy over the static role table
pub fn has_permission(role: Role, permission: Permission) -> bool {
    role.permissions().contains(&permission)
}

pub fn permissions_for(role: Role) -> &'static [Permission] {
    role.permissions()
}
