//! Capability traits shared by persisted records.

use chrono::{DateTime, Utc};

/// Identity + continuity across state changes.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the entity identifier.
    fn id(&self) -> &Self::Id;
}

/// Records that track when they were created and last modified.
pub trait Timestamped {
    fn created_at(&self) -> DateTime<Utc>;

    fn updated_at(&self) -> DateTime<Utc>;

    /// Refresh the modification timestamp.
    fn touch(&mut self, now: DateTime<Utc>);
}
