use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use aeternum_auth::{
    AuditAction, AuditLog, Permission, Principal, Profile, Role, RoleClaim, RolePermission,
    UserRole,
};
use aeternum_core::{AuditLogId, ClaimId, PrincipalId, RoleId};

/// Persistence gateway error.
///
/// These are **infrastructure errors**; field validation happens in the
/// domain layer before anything reaches the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The row addressed by an update/delete (or a referenced parent) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness rule was violated (duplicate id, role name, user name).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Anything else: connection failures, poisoned locks, decode errors.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }
}

/// Audit trail query. Empty filter matches everything; results are ordered by
/// timestamp ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditFilter {
    pub entity_name: Option<String>,
    pub entity_id: Option<String>,
    pub action: Option<AuditAction>,
    pub changed_by: Option<PrincipalId>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    /// All records about one subject.
    pub fn for_entity(entity_name: impl Into<String>, entity_id: impl ToString) -> Self {
        Self {
            entity_name: Some(entity_name.into()),
            entity_id: Some(entity_id.to_string()),
            ..Self::default()
        }
    }

    pub fn with_action(mut self, action: AuditAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn matches(&self, log: &AuditLog) -> bool {
        self.entity_name.as_deref().is_none_or(|n| n == log.entity_name)
            && self.entity_id.as_deref().is_none_or(|i| i == log.entity_id)
            && self.action.is_none_or(|a| a == log.action)
            && self.changed_by.is_none_or(|p| Some(p) == log.changed_by)
            && self.since.is_none_or(|t| log.timestamp >= t)
    }
}

/// Persistence gateway for the identity model.
///
/// Contract shared by every implementation:
/// - Reads of a missing row return `Ok(None)`.
/// - Updates/deletes of a missing row return [`StoreError::NotFound`].
/// - Role names and user names are unique case-insensitively
///   ([`StoreError::Conflict`]).
/// - Deleting a principal removes its profile and role links; deleting a role
///   removes its permissions, claims and links. Audit records are never
///   removed.
/// - Each call is atomic on its own; there is no cross-call transaction.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    // ── principals ──────────────────────────────────────────────────────────

    async fn insert_principal(&self, principal: &Principal) -> Result<(), StoreError>;

    async fn find_principal(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError>;

    /// Case-insensitive lookup.
    async fn find_principal_by_user_name(
        &self,
        user_name: &str,
    ) -> Result<Option<Principal>, StoreError>;

    /// Case-insensitive lookup by contact address.
    async fn find_principal_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError>;

    /// All principals, ordered by user name.
    async fn list_principals(&self) -> Result<Vec<Principal>, StoreError>;

    async fn update_principal(&self, principal: &Principal) -> Result<(), StoreError>;

    async fn delete_principal(&self, id: PrincipalId) -> Result<(), StoreError>;

    // ── profiles ────────────────────────────────────────────────────────────

    /// Insert or replace. `NotFound` if the principal does not exist.
    async fn upsert_profile(
        &self,
        principal_id: PrincipalId,
        profile: &Profile,
    ) -> Result<(), StoreError>;

    async fn find_profile(&self, principal_id: PrincipalId) -> Result<Option<Profile>, StoreError>;

    // ── roles ───────────────────────────────────────────────────────────────

    async fn insert_role(&self, role: &Role) -> Result<(), StoreError>;

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError>;

    /// Case-insensitive lookup.
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;

    /// All roles, ordered by name.
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;

    async fn update_role(&self, role: &Role) -> Result<(), StoreError>;

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError>;

    // ── user ↔ role links ───────────────────────────────────────────────────

    /// Set semantics: returns `false` (and leaves the existing row untouched)
    /// if the pair is already linked. `NotFound` if either side is missing.
    async fn attach_user_role(&self, link: &UserRole) -> Result<bool, StoreError>;

    /// Returns whether a row was removed.
    async fn detach_user_role(
        &self,
        principal_id: PrincipalId,
        role_id: RoleId,
    ) -> Result<bool, StoreError>;

    async fn list_user_roles_by_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Vec<UserRole>, StoreError>;

    async fn list_user_roles_by_role(&self, role_id: RoleId) -> Result<Vec<UserRole>, StoreError>;

    // ── role permissions ────────────────────────────────────────────────────

    /// Insert or replace the grant keyed by `(role, permission)`.
    async fn upsert_role_permission(&self, grant: &RolePermission) -> Result<(), StoreError>;

    async fn find_role_permission(
        &self,
        role_id: RoleId,
        permission: &Permission,
    ) -> Result<Option<RolePermission>, StoreError>;

    /// Grants ordered by permission name. Revoked rows only when asked.
    async fn list_role_permissions(
        &self,
        role_id: RoleId,
        include_revoked: bool,
    ) -> Result<Vec<RolePermission>, StoreError>;

    // ── role claims ─────────────────────────────────────────────────────────

    async fn insert_role_claim(&self, claim: &RoleClaim) -> Result<(), StoreError>;

    async fn update_role_claim(&self, claim: &RoleClaim) -> Result<(), StoreError>;

    /// `NotFound` unless the claim exists on that role.
    async fn delete_role_claim(&self, role_id: RoleId, claim_id: ClaimId)
    -> Result<(), StoreError>;

    /// Claims ordered by creation time.
    async fn list_role_claims(&self, role_id: RoleId) -> Result<Vec<RoleClaim>, StoreError>;

    // ── audit trail ─────────────────────────────────────────────────────────

    async fn append_audit_log(&self, log: &AuditLog) -> Result<(), StoreError>;

    async fn list_audit_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError>;

    /// Backfill marker; the only permitted change to an audit record.
    async fn mark_audit_log_modified(
        &self,
        id: AuditLogId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S> IdentityStore for Arc<S>
where
    S: IdentityStore + ?Sized,
{
    async fn insert_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        (**self).insert_principal(principal).await
    }

    async fn find_principal(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError> {
        (**self).find_principal(id).await
    }

    async fn find_principal_by_user_name(
        &self,
        user_name: &str,
    ) -> Result<Option<Principal>, StoreError> {
        (**self).find_principal_by_user_name(user_name).await
    }

    async fn find_principal_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        (**self).find_principal_by_email(email).await
    }

    async fn list_principals(&self) -> Result<Vec<Principal>, StoreError> {
        (**self).list_principals().await
    }

    async fn update_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        (**self).update_principal(principal).await
    }

    async fn delete_principal(&self, id: PrincipalId) -> Result<(), StoreError> {
        (**self).delete_principal(id).await
    }

    async fn upsert_profile(
        &self,
        principal_id: PrincipalId,
        profile: &Profile,
    ) -> Result<(), StoreError> {
        (**self).upsert_profile(principal_id, profile).await
    }

    async fn find_profile(&self, principal_id: PrincipalId) -> Result<Option<Profile>, StoreError> {
        (**self).find_profile(principal_id).await
    }

    async fn insert_role(&self, role: &Role) -> Result<(), StoreError> {
        (**self).insert_role(role).await
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        (**self).find_role(id).await
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        (**self).find_role_by_name(name).await
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        (**self).list_roles().await
    }

    async fn update_role(&self, role: &Role) -> Result<(), StoreError> {
        (**self).update_role(role).await
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        (**self).delete_role(id).await
    }

    async fn attach_user_role(&self, link: &UserRole) -> Result<bool, StoreError> {
        (**self).attach_user_role(link).await
    }

    async fn detach_user_role(
        &self,
        principal_id: PrincipalId,
        role_id: RoleId,
    ) -> Result<bool, StoreError> {
        (**self).detach_user_role(principal_id, role_id).await
    }

    async fn list_user_roles_by_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Vec<UserRole>, StoreError> {
        (**self).list_user_roles_by_principal(principal_id).await
    }

    async fn list_user_roles_by_role(&self, role_id: RoleId) -> Result<Vec<UserRole>, StoreError> {
        (**self).list_user_roles_by_role(role_id).await
    }

    async fn upsert_role_permission(&self, grant: &RolePermission) -> Result<(), StoreError> {
        (**self).upsert_role_permission(grant).await
    }

    async fn find_role_permission(
        &self,
        role_id: RoleId,
        permission: &Permission,
    ) -> Result<Option<RolePermission>, StoreError> {
        (**self).find_role_permission(role_id, permission).await
    }

    async fn list_role_permissions(
        &self,
        role_id: RoleId,
        include_revoked: bool,
    ) -> Result<Vec<RolePermission>, StoreError> {
        (**self).list_role_permissions(role_id, include_revoked).await
    }

    async fn insert_role_claim(&self, claim: &RoleClaim) -> Result<(), StoreError> {
        (**self).insert_role_claim(claim).await
    }

    async fn update_role_claim(&self, claim: &RoleClaim) -> Result<(), StoreError> {
        (**self).update_role_claim(claim).await
    }

    async fn delete_role_claim(
        &self,
        role_id: RoleId,
        claim_id: ClaimId,
    ) -> Result<(), StoreError> {
        (**self).delete_role_claim(role_id, claim_id).await
    }

    async fn list_role_claims(&self, role_id: RoleId) -> Result<Vec<RoleClaim>, StoreError> {
        (**self).list_role_claims(role_id).await
    }

    async fn append_audit_log(&self, log: &AuditLog) -> Result<(), StoreError> {
        (**self).append_audit_log(log).await
    }

    async fn list_audit_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError> {
        (**self).list_audit_logs(filter).await
    }

    async fn mark_audit_log_modified(
        &self,
        id: AuditLogId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        (**self).mark_audit_log_modified(id, at).await
    }
}
