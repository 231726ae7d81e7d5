//! `aeternum-services` — role and principal administration.
//!
//! Services take transport shapes ([`dto`]), validate them, go through the
//! identity engine or the store, emit one audit record per successful change
//! and return transport shapes or a [`ServiceError`].

pub mod dto;
pub mod error;
pub mod principal_service;
pub mod role_service;
pub mod wiring;

pub use error::{ServiceError, ServiceResult};
pub use principal_service::PrincipalService;
pub use role_service::RoleService;
pub use wiring::{IdentityServices, build_services};
