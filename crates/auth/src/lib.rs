//! `aeternum-auth` — identity and access-management domain model.
//!
//! Plain records for principals, roles and their relationships. This crate is
//! intentionally decoupled from storage and transport: persistence lives in
//! `aeternum-infra`, orchestration in `aeternum-services`.

pub mod audit;
pub mod claims;
pub mod permissions;
pub mod principal;
pub mod profile;
pub mod roles;
pub mod user_role;

pub use audit::{Actor, AuditAction, AuditEntry, AuditLog};
pub use claims::RoleClaim;
pub use permissions::{Permission, PermissionCatalog, RolePermission};
pub use principal::{BlockState, Principal};
pub use profile::Profile;
pub use roles::Role;
pub use user_role::UserRole;
