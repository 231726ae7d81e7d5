//! Persistence gateway for principals, roles and their relationships.
//!
//! [`IdentityStore`] is the only way services touch storage. Two
//! implementations ship: [`InMemoryIdentityStore`] for tests/dev and
//! [`PostgresIdentityStore`] for persistent deployments.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryIdentityStore;
pub use postgres::PostgresIdentityStore;
pub use r#trait::{AuditFilter, IdentityStore, StoreError};
