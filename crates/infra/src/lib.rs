//! Infrastructure layer: persistence gateway, identity engine, audit sink and
//! store configuration.

pub mod audit;
pub mod config;
pub mod identity;
pub mod store;

pub use audit::{AuditError, AuditSink, StoreAuditSink};
pub use config::{ConfigError, StoreConfig, build_store, connect_postgres};
pub use identity::{IdentityEngine, IdentityFailure, StoreIdentityEngine};
pub use store::{
    AuditFilter, IdentityStore, InMemoryIdentityStore, PostgresIdentityStore, StoreError,
};
