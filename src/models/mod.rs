//! Data models

mod audit;
mod membership;
mod organization;
mod rbac;
mod resident;
mod token;
mod user;

pub use audit::*;
pub use membership::*;
pub use organization::*;
pub use rbac::*;
pub use resident::*;
pub use token::*;
pub use user::*;
