use std::borrow::Cow;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aeternum_core::error::{require_max_len, require_non_empty};
use aeternum_core::{DomainError, DomainResult, RoleId, ValueObject};

/// Capability name (e.g. "CanEditArticle").
///
/// Values are only produced through [`PermissionCatalog::resolve`], which
/// guarantees the name is on the allow-list and in its canonical casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub const MAX_LEN: usize = 100;

    /// Rehydrate a name that was resolved before it was persisted.
    pub fn from_stored(name: String) -> Self {
        Self(Cow::Owned(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ValueObject for Permission {}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Allow-list of capability names that may be granted to roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCatalog {
    allowed: Vec<Cow<'static, str>>,
}

impl PermissionCatalog {
    pub const BUILTIN: [&'static str; 3] = ["CanEditArticle", "CanDeleteUser", "CanViewReports"];

    pub fn builtin() -> Self {
        Self {
            allowed: Self::BUILTIN.iter().map(|p| Cow::Borrowed(*p)).collect(),
        }
    }

    /// Extend the allow-list. Adding a name that already exists (in any
    /// casing) is a no-op.
    pub fn with(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        if self.find(&name).is_none() {
            self.allowed.push(name);
        }
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(|p| p.as_ref())
    }

    pub fn contains(&self, raw: &str) -> bool {
        self.find(raw.trim()).is_some()
    }

    /// Validate a raw permission string and return its canonical form.
    ///
    /// Matching is case-insensitive.
    pub fn resolve(&self, raw: &str) -> DomainResult<Permission> {
        require_non_empty("permission", raw)?;
        let raw = raw.trim();
        require_max_len("permission", raw, Permission::MAX_LEN)?;
        self.find(raw)
            .map(|canonical| Permission(canonical.clone()))
            .ok_or_else(|| DomainError::validation(format!("invalid permission '{raw}'")))
    }

    fn find(&self, raw: &str) -> Option<&Cow<'static, str>> {
        self.allowed.iter().find(|p| p.eq_ignore_ascii_case(raw))
    }
}

impl Default for PermissionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// A permission granted to a role.
///
/// Revocation is a soft delete: `revoked_at` is set and the row is kept so the
/// grant history stays visible. Granting the same permission again reactivates
/// the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission: Permission,
    pub assigned_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl RolePermission {
    pub fn new(role_id: RoleId, permission: Permission, now: DateTime<Utc>) -> Self {
        Self {
            role_id,
            permission,
            assigned_at: now,
            revoked_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }

    /// Returns `false` if the grant was already revoked.
    pub fn revoke(&mut self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        self.revoked_at = Some(now);
        true
    }

    /// Returns `false` if the grant was already active.
    pub fn reactivate(&mut self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_none() {
            return false;
        }
        self.revoked_at = None;
        self.assigned_at = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn resolve_returns_canonical_casing() {
        let catalog = PermissionCatalog::builtin();
        let p = catalog.resolve("  caneditarticle ").unwrap();
        assert_eq!(p.as_str(), "CanEditArticle");
    }

    #[test]
    fn resolve_rejects_unknown_permission() {
        let err = PermissionCatalog::builtin().resolve("CanFlyToMars").unwrap_err();
        assert_eq!(
            err,
            DomainError::Validation("invalid permission 'CanFlyToMars'".to_string())
        );
    }

    #[test]
    fn catalog_is_extensible() {
        let catalog = PermissionCatalog::builtin().with("CanPublish").with("canpublish");
        assert_eq!(catalog.names().count(), 4);
        assert_eq!(catalog.resolve("CANPUBLISH").unwrap().as_str(), "CanPublish");
    }

    #[test]
    fn revoke_then_reactivate() {
        let now = Utc::now();
        let permission = PermissionCatalog::builtin().resolve("CanViewReports").unwrap();
        let mut grant = RolePermission::new(RoleId::new(), permission, now);
        assert!(grant.revoke(now));
        assert!(!grant.revoke(now));
        assert!(!grant.is_active());

        let later = now + chrono::Duration::seconds(3);
        assert!(grant.reactivate(later));
        assert!(grant.is_active());
        assert_eq!(grant.assigned_at, later);
    }

    #[test]
    fn permission_serializes_as_plain_string() {
        let p = PermissionCatalog::builtin().resolve("CanDeleteUser").unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"CanDeleteUser\"");
    }

    proptest! {
        /// Anything that is not a case variant of a built-in name is rejected.
        #[test]
        fn only_allow_listed_names_resolve(raw in "[A-Za-z]{1,40}") {
            let catalog = PermissionCatalog::builtin();
            let listed = PermissionCatalog::BUILTIN
                .iter()
                .any(|p| p.eq_ignore_ascii_case(&raw));
            prop_assert_eq!(catalog.resolve(&raw).is_ok(), listed);
        }
    }
}
