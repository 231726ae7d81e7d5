//! Role administration: roles, their permission grants and claims.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use aeternum_auth::audit::entity_names;
use aeternum_auth::{
    Actor, AuditAction, AuditEntry, PermissionCatalog, Role, RoleClaim, RolePermission,
};
use aeternum_core::{ClaimId, Clock, RoleId, Timestamped};
use aeternum_infra::{AuditSink, IdentityStore};

use crate::dto::{
    ClaimRequest, CreateRoleRequest, RoleClaimDto, RoleDto, RolePermissionDto, UpdateRoleRequest,
};
use crate::error::{ServiceError, ServiceResult};

pub struct RoleService<S, A> {
    store: S,
    audit: A,
    catalog: PermissionCatalog,
    clock: Arc<dyn Clock>,
}

impl<S, A> RoleService<S, A>
where
    S: IdentityStore,
    A: AuditSink,
{
    pub fn new(store: S, audit: A, catalog: PermissionCatalog, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            audit,
            catalog,
            clock,
        }
    }

    pub fn catalog(&self) -> &PermissionCatalog {
        &self.catalog
    }

    pub async fn get_by_id(&self, id: RoleId) -> ServiceResult<RoleDto> {
        Ok(self.require_role(id).await?.into())
    }

    /// Case-insensitive.
    pub async fn get_by_name(&self, name: &str) -> ServiceResult<RoleDto> {
        self.store
            .find_role_by_name(name)
            .await?
            .map(RoleDto::from)
            .ok_or_else(|| ServiceError::not_found(format!("role '{}'", name.trim())))
    }

    pub async fn get_all(&self) -> ServiceResult<Vec<RoleDto>> {
        Ok(self
            .store
            .list_roles()
            .await?
            .into_iter()
            .map(RoleDto::from)
            .collect())
    }

    #[instrument(skip(self, request), fields(role = %request.name), err)]
    pub async fn create(&self, actor: Actor, request: CreateRoleRequest) -> ServiceResult<RoleDto> {
        let role = Role::new(
            RoleId::new(),
            &request.name,
            request.description,
            self.clock.now(),
        )?;

        if self.store.find_role_by_name(&role.name).await?.is_some() {
            return Err(ServiceError::conflict(format!(
                "role '{}' already exists",
                role.name
            )));
        }
        self.store.insert_role(&role).await?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::AddRole, entity_names::ROLE, role.id)
                    .with_description(format!("created role '{}'", role.name)),
            )
            .await?;
        info!(role_id = %role.id, "role created");
        Ok(role.into())
    }

    #[instrument(skip(self, request), fields(role_id = %id), err)]
    pub async fn update(
        &self,
        actor: Actor,
        id: RoleId,
        request: UpdateRoleRequest,
    ) -> ServiceResult<RoleDto> {
        let mut role = self.require_role(id).await?;
        let now = self.clock.now();

        if let Some(name) = request.name.as_deref() {
            if Role::normalize_name(name) != role.normalized_name() {
                if let Some(other) = self.store.find_role_by_name(name).await? {
                    if other.id != role.id {
                        return Err(ServiceError::conflict(format!(
                            "role '{}' already exists",
                            other.name
                        )));
                    }
                }
            }
            role.rename(name, now)?;
        }
        if let Some(description) = request.description {
            role.update_description(Some(description), now)?;
        }
        role.touch(now);
        self.store.update_role(&role).await?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::UpdateRole, entity_names::ROLE, role.id)
                    .with_description(format!("updated role '{}'", role.name)),
            )
            .await?;
        Ok(role.into())
    }

    /// Removes the role with its grants, claims and user links.
    #[instrument(skip(self), fields(role_id = %id), err)]
    pub async fn delete(&self, actor: Actor, id: RoleId) -> ServiceResult<()> {
        let role = self.require_role(id).await?;
        self.store.delete_role(id).await?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::RemoveRole, entity_names::ROLE, id)
                    .with_description(format!("deleted role '{}'", role.name)),
            )
            .await?;
        info!(role_id = %id, "role deleted");
        Ok(())
    }

    // ── permissions ─────────────────────────────────────────────────────────

    /// Grant a permission. Granting an already active permission returns the
    /// existing grant unchanged.
    #[instrument(skip(self), fields(role_id = %id), err)]
    pub async fn add_permission(
        &self,
        actor: Actor,
        id: RoleId,
        permission: &str,
    ) -> ServiceResult<RolePermissionDto> {
        let permission = self.catalog.resolve(permission)?;
        let role = self.require_role(id).await?;
        let now = self.clock.now();

        let grant = match self.store.find_role_permission(id, &permission).await? {
            Some(existing) if existing.is_active() => {
                debug!(%permission, "permission already granted");
                return Ok(existing.into());
            }
            Some(mut revoked) => {
                revoked.reactivate(now);
                revoked
            }
            None => RolePermission::new(id, permission, now),
        };
        self.store.upsert_role_permission(&grant).await?;
        self.touch(role, now).await?;

        self.audit
            .record(
                AuditEntry::new(
                    actor,
                    AuditAction::AssignPermission,
                    entity_names::ROLE_PERMISSION,
                    id,
                )
                .with_description(format!("granted {}", grant.permission)),
            )
            .await?;
        Ok(grant.into())
    }

    /// Revoke a permission. Revoking something that is not actively granted
    /// succeeds without changes.
    #[instrument(skip(self), fields(role_id = %id), err)]
    pub async fn remove_permission(
        &self,
        actor: Actor,
        id: RoleId,
        permission: &str,
    ) -> ServiceResult<()> {
        let permission = self.catalog.resolve(permission)?;
        let role = self.require_role(id).await?;

        let Some(mut grant) = self.store.find_role_permission(id, &permission).await? else {
            return Ok(());
        };
        let now = self.clock.now();
        if !grant.revoke(now) {
            return Ok(());
        }
        self.store.upsert_role_permission(&grant).await?;
        self.touch(role, now).await?;

        self.audit
            .record(
                AuditEntry::new(
                    actor,
                    AuditAction::RevokePermission,
                    entity_names::ROLE_PERMISSION,
                    id,
                )
                .with_description(format!("revoked {}", grant.permission)),
            )
            .await?;
        Ok(())
    }

    /// Active grants only.
    pub async fn list_permissions(&self, id: RoleId) -> ServiceResult<Vec<RolePermissionDto>> {
        self.require_role(id).await?;
        Ok(self
            .store
            .list_role_permissions(id, false)
            .await?
            .into_iter()
            .map(RolePermissionDto::from)
            .collect())
    }

    // ── claims ──────────────────────────────────────────────────────────────

    #[instrument(skip(self, request), fields(role_id = %id), err)]
    pub async fn add_claim(
        &self,
        actor: Actor,
        id: RoleId,
        request: ClaimRequest,
    ) -> ServiceResult<RoleClaimDto> {
        let now = self.clock.now();
        let claim = RoleClaim::new(
            ClaimId::new(),
            id,
            &request.claim_type,
            &request.claim_value,
            now,
        )?;
        let role = self.require_role(id).await?;

        self.store.insert_role_claim(&claim).await?;
        self.touch(role, now).await?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::UpdateRole, entity_names::ROLE_CLAIM, claim.id)
                    .with_description(format!("added claim to role {id}: {}", claim.details())),
            )
            .await?;
        Ok(claim.into())
    }

    #[instrument(skip(self, request), fields(role_id = %id, claim_id = %claim_id), err)]
    pub async fn update_claim(
        &self,
        actor: Actor,
        id: RoleId,
        claim_id: ClaimId,
        request: ClaimRequest,
    ) -> ServiceResult<RoleClaimDto> {
        let role = self.require_role(id).await?;
        let mut claim = self
            .store
            .list_role_claims(id)
            .await?
            .into_iter()
            .find(|c| c.id == claim_id)
            .ok_or_else(|| ServiceError::not_found(format!("claim {claim_id} on role {id}")))?;

        let now = self.clock.now();
        claim.update(&request.claim_type, &request.claim_value, now)?;
        self.store.update_role_claim(&claim).await?;
        self.touch(role, now).await?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::UpdateRole, entity_names::ROLE_CLAIM, claim.id)
                    .with_description(format!("updated claim on role {id}: {}", claim.details())),
            )
            .await?;
        Ok(claim.into())
    }

    #[instrument(skip(self), fields(role_id = %id, claim_id = %claim_id), err)]
    pub async fn remove_claim(&self, actor: Actor, id: RoleId, claim_id: ClaimId) -> ServiceResult<()> {
        let role = self.require_role(id).await?;
        self.store.delete_role_claim(id, claim_id).await?;
        self.touch(role, self.clock.now()).await?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::UpdateRole, entity_names::ROLE_CLAIM, claim_id)
                    .with_description(format!("removed claim from role {id}")),
            )
            .await?;
        Ok(())
    }

    pub async fn list_claims(&self, id: RoleId) -> ServiceResult<Vec<RoleClaimDto>> {
        self.require_role(id).await?;
        Ok(self
            .store
            .list_role_claims(id)
            .await?
            .into_iter()
            .map(RoleClaimDto::from)
            .collect())
    }

    // ── helpers ─────────────────────────────────────────────────────────────

    pub(crate) async fn require_role(&self, id: RoleId) -> ServiceResult<Role> {
        self.store
            .find_role(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("role {id}")))
    }

    async fn touch(&self, mut role: Role, now: chrono::DateTime<chrono::Utc>) -> ServiceResult<()> {
        role.touch(now);
        self.store.update_role(&role).await?;
        Ok(())
    }
}
