//! `aeternum-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod clock;
pub mod entity;
pub mod error;
pub mod id;
pub mod value_object;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entity::{Entity, Timestamped};
pub use error::{DomainError, DomainResult};
pub use id::{AuditLogId, ClaimId, PrincipalId, RoleId};
pub use value_object::ValueObject;
