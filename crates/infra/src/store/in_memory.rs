use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use aeternum_auth::{
    AuditLog, Permission, Principal, Profile, Role, RoleClaim, RolePermission, UserRole,
};
use aeternum_core::{AuditLogId, ClaimId, PrincipalId, RoleId};

use super::r#trait::{AuditFilter, IdentityStore, StoreError};

#[derive(Debug, Default)]
struct State {
    principals: HashMap<PrincipalId, Principal>,
    /// lower(user_name) -> id
    user_names: HashMap<String, PrincipalId>,
    /// lower(email) -> id
    emails: HashMap<String, PrincipalId>,
    profiles: HashMap<PrincipalId, Profile>,

    roles: HashMap<RoleId, Role>,
    /// lower(name) -> id
    role_names: HashMap<String, RoleId>,

    user_roles: HashMap<(PrincipalId, RoleId), UserRole>,
    roles_by_principal: HashMap<PrincipalId, HashSet<RoleId>>,
    principals_by_role: HashMap<RoleId, HashSet<PrincipalId>>,

    permissions: HashMap<RoleId, BTreeMap<String, RolePermission>>,
    claims: HashMap<RoleId, HashMap<ClaimId, RoleClaim>>,

    audit_logs: Vec<AuditLog>,
}

impl State {
    fn require_principal(&self, id: PrincipalId) -> Result<(), StoreError> {
        if self.principals.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::not_found(format!("principal {id}")))
        }
    }

    fn require_role(&self, id: RoleId) -> Result<(), StoreError> {
        if self.roles.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::not_found(format!("role {id}")))
        }
    }

    fn unlink(&mut self, principal_id: PrincipalId, role_id: RoleId) -> bool {
        if self.user_roles.remove(&(principal_id, role_id)).is_none() {
            return false;
        }
        if let Some(set) = self.roles_by_principal.get_mut(&principal_id) {
            set.remove(&role_id);
        }
        if let Some(set) = self.principals_by_role.get_mut(&role_id) {
            set.remove(&principal_id);
        }
        true
    }
}

/// In-memory identity store.
///
/// Intended for tests/dev. A single lock guards all tables so every gateway
/// call is atomic.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    state: RwLock<State>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))
    }
}

fn lower(s: &str) -> String {
    s.trim().to_lowercase()
}

#[async_trait::async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn insert_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.principals.contains_key(&principal.id) {
            return Err(StoreError::conflict(format!(
                "principal {} already exists",
                principal.id
            )));
        }
        let key = lower(&principal.user_name);
        if state.user_names.contains_key(&key) {
            return Err(StoreError::conflict(format!(
                "user name '{}' is already taken",
                principal.user_name
            )));
        }
        let email = lower(&principal.email);
        if state.emails.contains_key(&email) {
            return Err(StoreError::conflict(format!(
                "email '{}' is already taken",
                principal.email
            )));
        }
        state.user_names.insert(key, principal.id);
        state.emails.insert(email, principal.id);
        state.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn find_principal(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError> {
        Ok(self.read()?.principals.get(&id).cloned())
    }

    async fn find_principal_by_user_name(
        &self,
        user_name: &str,
    ) -> Result<Option<Principal>, StoreError> {
        let state = self.read()?;
        Ok(state
            .user_names
            .get(&lower(user_name))
            .and_then(|id| state.principals.get(id))
            .cloned())
    }

    async fn find_principal_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        let state = self.read()?;
        Ok(state
            .emails
            .get(&lower(email))
            .and_then(|id| state.principals.get(id))
            .cloned())
    }

    async fn list_principals(&self) -> Result<Vec<Principal>, StoreError> {
        let state = self.read()?;
        let mut all: Vec<Principal> = state.principals.values().cloned().collect();
        all.sort_by_key(|p| (lower(&p.user_name), p.id));
        Ok(all)
    }

    async fn update_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let (previous_name, previous_email) = state
            .principals
            .get(&principal.id)
            .map(|p| (lower(&p.user_name), lower(&p.email)))
            .ok_or_else(|| StoreError::not_found(format!("principal {}", principal.id)))?;

        let key = lower(&principal.user_name);
        if key != previous_name && state.user_names.contains_key(&key) {
            return Err(StoreError::conflict(format!(
                "user name '{}' is already taken",
                principal.user_name
            )));
        }
        let email = lower(&principal.email);
        if email != previous_email && state.emails.contains_key(&email) {
            return Err(StoreError::conflict(format!(
                "email '{}' is already taken",
                principal.email
            )));
        }

        state.user_names.remove(&previous_name);
        state.user_names.insert(key, principal.id);
        state.emails.remove(&previous_email);
        state.emails.insert(email, principal.id);
        state.principals.insert(principal.id, principal.clone());
        Ok(())
    }

    async fn delete_principal(&self, id: PrincipalId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let removed = state
            .principals
            .remove(&id)
            .ok_or_else(|| StoreError::not_found(format!("principal {id}")))?;
        state.user_names.remove(&lower(&removed.user_name));
        state.emails.remove(&lower(&removed.email));
        state.profiles.remove(&id);
        let role_ids = state.roles_by_principal.remove(&id).unwrap_or_default();
        for role_id in role_ids {
            state.user_roles.remove(&(id, role_id));
            if let Some(set) = state.principals_by_role.get_mut(&role_id) {
                set.remove(&id);
            }
        }
        Ok(())
    }

    async fn upsert_profile(
        &self,
        principal_id: PrincipalId,
        profile: &Profile,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.require_principal(principal_id)?;
        state.profiles.insert(principal_id, profile.clone());
        Ok(())
    }

    async fn find_profile(&self, principal_id: PrincipalId) -> Result<Option<Profile>, StoreError> {
        Ok(self.read()?.profiles.get(&principal_id).cloned())
    }

    async fn insert_role(&self, role: &Role) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.roles.contains_key(&role.id) {
            return Err(StoreError::conflict(format!("role {} already exists", role.id)));
        }
        let key = role.normalized_name();
        if state.role_names.contains_key(&key) {
            return Err(StoreError::conflict(format!(
                "role name '{}' already exists",
                role.name
            )));
        }
        state.role_names.insert(key, role.id);
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let state = self.read()?;
        Ok(state
            .role_names
            .get(&Role::normalize_name(name))
            .and_then(|id| state.roles.get(id))
            .cloned())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let state = self.read()?;
        let mut all: Vec<Role> = state.roles.values().cloned().collect();
        all.sort_by_key(|r| (r.normalized_name(), r.id));
        Ok(all)
    }

    async fn update_role(&self, role: &Role) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let previous = state
            .roles
            .get(&role.id)
            .map(Role::normalized_name)
            .ok_or_else(|| StoreError::not_found(format!("role {}", role.id)))?;

        let key = role.normalized_name();
        if key != previous {
            if state.role_names.contains_key(&key) {
                return Err(StoreError::conflict(format!(
                    "role name '{}' already exists",
                    role.name
                )));
            }
            state.role_names.remove(&previous);
            state.role_names.insert(key, role.id);
        }
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let removed = state
            .roles
            .remove(&id)
            .ok_or_else(|| StoreError::not_found(format!("role {id}")))?;
        state.role_names.remove(&removed.normalized_name());
        state.permissions.remove(&id);
        state.claims.remove(&id);
        let principal_ids = state.principals_by_role.remove(&id).unwrap_or_default();
        for principal_id in principal_ids {
            state.user_roles.remove(&(principal_id, id));
            if let Some(set) = state.roles_by_principal.get_mut(&principal_id) {
                set.remove(&id);
            }
        }
        Ok(())
    }

    async fn attach_user_role(&self, link: &UserRole) -> Result<bool, StoreError> {
        let mut state = self.write()?;
        state.require_principal(link.principal_id)?;
        state.require_role(link.role_id)?;
        if state.user_roles.contains_key(&link.key()) {
            return Ok(false);
        }
        state.user_roles.insert(link.key(), link.clone());
        state
            .roles_by_principal
            .entry(link.principal_id)
            .or_default()
            .insert(link.role_id);
        state
            .principals_by_role
            .entry(link.role_id)
            .or_default()
            .insert(link.principal_id);
        Ok(true)
    }

    async fn detach_user_role(
        &self,
        principal_id: PrincipalId,
        role_id: RoleId,
    ) -> Result<bool, StoreError> {
        Ok(self.write()?.unlink(principal_id, role_id))
    }

    async fn list_user_roles_by_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Vec<UserRole>, StoreError> {
        let state = self.read()?;
        let mut links: Vec<UserRole> = state
            .roles_by_principal
            .get(&principal_id)
            .into_iter()
            .flatten()
            .filter_map(|role_id| state.user_roles.get(&(principal_id, *role_id)))
            .cloned()
            .collect();
        links.sort_by_key(|l| (l.assigned_at, l.role_id));
        Ok(links)
    }

    async fn list_user_roles_by_role(&self, role_id: RoleId) -> Result<Vec<UserRole>, StoreError> {
        let state = self.read()?;
        let mut links: Vec<UserRole> = state
            .principals_by_role
            .get(&role_id)
            .into_iter()
            .flatten()
            .filter_map(|principal_id| state.user_roles.get(&(*principal_id, role_id)))
            .cloned()
            .collect();
        links.sort_by_key(|l| (l.assigned_at, l.principal_id));
        Ok(links)
    }

    async fn upsert_role_permission(&self, grant: &RolePermission) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.require_role(grant.role_id)?;
        state
            .permissions
            .entry(grant.role_id)
            .or_default()
            .insert(grant.permission.as_str().to_string(), grant.clone());
        Ok(())
    }

    async fn find_role_permission(
        &self,
        role_id: RoleId,
        permission: &Permission,
    ) -> Result<Option<RolePermission>, StoreError> {
        Ok(self
            .read()?
            .permissions
            .get(&role_id)
            .and_then(|grants| grants.get(permission.as_str()))
            .cloned())
    }

    async fn list_role_permissions(
        &self,
        role_id: RoleId,
        include_revoked: bool,
    ) -> Result<Vec<RolePermission>, StoreError> {
        Ok(self
            .read()?
            .permissions
            .get(&role_id)
            .into_iter()
            .flat_map(|grants| grants.values())
            .filter(|g| include_revoked || g.is_active())
            .cloned()
            .collect())
    }

    async fn insert_role_claim(&self, claim: &RoleClaim) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state.require_role(claim.role_id)?;
        let claims = state.claims.entry(claim.role_id).or_default();
        if claims.contains_key(&claim.id) {
            return Err(StoreError::conflict(format!("claim {} already exists", claim.id)));
        }
        claims.insert(claim.id, claim.clone());
        Ok(())
    }

    async fn update_role_claim(&self, claim: &RoleClaim) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let slot = state
            .claims
            .get_mut(&claim.role_id)
            .and_then(|claims| claims.get_mut(&claim.id))
            .ok_or_else(|| {
                StoreError::not_found(format!("claim {} on role {}", claim.id, claim.role_id))
            })?;
        *slot = claim.clone();
        Ok(())
    }

    async fn delete_role_claim(
        &self,
        role_id: RoleId,
        claim_id: ClaimId,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        state
            .claims
            .get_mut(&role_id)
            .and_then(|claims| claims.remove(&claim_id))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("claim {claim_id} on role {role_id}")))
    }

    async fn list_role_claims(&self, role_id: RoleId) -> Result<Vec<RoleClaim>, StoreError> {
        let state = self.read()?;
        let mut claims: Vec<RoleClaim> = state
            .claims
            .get(&role_id)
            .into_iter()
            .flat_map(|claims| claims.values())
            .cloned()
            .collect();
        claims.sort_by_key(|c| (c.created_at, c.id));
        Ok(claims)
    }

    async fn append_audit_log(&self, log: &AuditLog) -> Result<(), StoreError> {
        let mut state = self.write()?;
        if state.audit_logs.iter().any(|l| l.id == log.id) {
            return Err(StoreError::conflict(format!("audit log {} already exists", log.id)));
        }
        state.audit_logs.push(log.clone());
        Ok(())
    }

    async fn list_audit_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError> {
        let state = self.read()?;
        let mut logs: Vec<AuditLog> = state
            .audit_logs
            .iter()
            .filter(|l| filter.matches(l))
            .cloned()
            .collect();
        logs.sort_by_key(|l| (l.timestamp, l.id));
        if let Some(limit) = filter.limit {
            logs.truncate(limit);
        }
        Ok(logs)
    }

    async fn mark_audit_log_modified(
        &self,
        id: AuditLogId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.write()?;
        let log = state
            .audit_logs
            .iter_mut()
            .find(|l| l.id == id)
            .ok_or_else(|| StoreError::not_found(format!("audit log {id}")))?;
        log.mark_modified(at);
        Ok(())
    }
}
