//! Principal (user account) administration.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use aeternum_auth::audit::entity_names;
use aeternum_auth::{Actor, AuditAction, AuditEntry, Principal, Profile, Role};
use aeternum_core::error::require_non_empty;
use aeternum_core::{Clock, PrincipalId, RoleId, Timestamped};
use aeternum_infra::{AuditSink, IdentityEngine, IdentityStore};

use crate::dto::{
    ClaimPair, CreatePrincipalRequest, EffectivePermissions, PrincipalDto, ProfileDto,
    UpdatePrincipalRequest,
};
use crate::error::{ServiceError, ServiceResult};
use crate::role_service::RoleService;

pub struct PrincipalService<S, E, A> {
    store: S,
    engine: E,
    roles: Arc<RoleService<S, A>>,
    audit: A,
    clock: Arc<dyn Clock>,
}

impl<S, E, A> PrincipalService<S, E, A>
where
    S: IdentityStore,
    E: IdentityEngine,
    A: AuditSink,
{
    pub fn new(
        store: S,
        engine: E,
        roles: Arc<RoleService<S, A>>,
        audit: A,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            engine,
            roles,
            audit,
            clock,
        }
    }

    pub async fn get_by_id(&self, id: PrincipalId) -> ServiceResult<PrincipalDto> {
        let principal = self.require_principal(id).await?;
        self.shape(principal).await
    }

    pub async fn get_all(&self) -> ServiceResult<Vec<PrincipalDto>> {
        let principals = self.store.list_principals().await?;
        let mut shaped = Vec::with_capacity(principals.len());
        for principal in principals {
            shaped.push(self.shape(principal).await?);
        }
        Ok(shaped)
    }

    /// Create an account and its profile. The account starts Active.
    #[instrument(skip(self, request), fields(user_name = %request.user_name), err)]
    pub async fn create(
        &self,
        actor: Actor,
        request: CreatePrincipalRequest,
    ) -> ServiceResult<PrincipalDto> {
        let profile = Profile::from(request.profile);
        profile.ensure_valid()?;
        let principal = Principal::new(
            PrincipalId::new(),
            &request.user_name,
            &request.email,
            self.clock.now(),
        )?;

        self.engine
            .create(&principal)
            .await
            .map_err(ServiceError::rejected)?;

        if let Err(err) = self.store.upsert_profile(principal.id, &profile).await {
            // Leave no account without a profile behind.
            if let Err(cleanup) = self.engine.delete(principal.id).await {
                warn!(principal_id = %principal.id, error = %cleanup, "failed to roll back identity");
            }
            return Err(err.into());
        }

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::CreateUser, entity_names::USER, principal.id)
                    .with_description(format!("created user '{}'", principal.user_name)),
            )
            .await?;
        info!(principal_id = %principal.id, "principal created");
        Ok(PrincipalDto::from_parts(principal, Some(profile), Vec::new()))
    }

    /// Rename (profile first/last name) and toggle `is_active`.
    #[instrument(skip(self, request), fields(principal_id = %id), err)]
    pub async fn update(
        &self,
        actor: Actor,
        id: PrincipalId,
        request: UpdatePrincipalRequest,
    ) -> ServiceResult<PrincipalDto> {
        let mut principal = self.require_principal(id).await?;
        require_non_empty("first name", &request.first_name)?;
        require_non_empty("last name", &request.last_name)?;

        let previous = self.require_profile(id).await?;
        let mut profile = previous.clone();
        profile.update_names(&request.first_name, &request.last_name);
        profile.ensure_valid()?;

        self.store.upsert_profile(id, &profile).await?;
        principal.set_active(request.is_active, self.clock.now());
        if let Err(failure) = self.engine.update(&principal).await {
            // Put the old names back so the call has no effect.
            if let Err(err) = self.store.upsert_profile(id, &previous).await {
                warn!(principal_id = %id, error = %err, "failed to restore profile");
            }
            return Err(ServiceError::failed(failure));
        }

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::UpdateUser, entity_names::USER, id)
                    .with_description(format!(
                        "updated user '{}' (active: {})",
                        principal.user_name, principal.is_active
                    )),
            )
            .await?;
        self.shape(principal).await
    }

    /// Removes the account, its profile and its role links.
    #[instrument(skip(self), fields(principal_id = %id), err)]
    pub async fn delete(&self, actor: Actor, id: PrincipalId) -> ServiceResult<()> {
        let principal = self.require_principal(id).await?;
        self.engine.delete(id).await.map_err(ServiceError::failed)?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::DeleteUser, entity_names::USER, id)
                    .with_description(format!("deleted user '{}'", principal.user_name)),
            )
            .await?;
        info!(principal_id = %id, "principal deleted");
        Ok(())
    }

    /// Link a role. Holding the role already is a success without changes.
    #[instrument(skip(self), fields(principal_id = %id, role_id = %role_id), err)]
    pub async fn assign_role(&self, actor: Actor, id: PrincipalId, role_id: RoleId) -> ServiceResult<()> {
        let principal = self.require_principal(id).await?;
        let role = self.roles.get_by_id(role_id).await?;

        if self.holds(id, role_id).await? {
            return Ok(());
        }
        self.engine
            .add_to_role(id, &role.name)
            .await
            .map_err(ServiceError::failed)?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::AddRole, entity_names::USER_ROLE, link_id(id, role_id))
                    .with_description(format!(
                        "assigned role '{}' to user '{}'",
                        role.name, principal.user_name
                    )),
            )
            .await?;
        Ok(())
    }

    /// Unlink a role. A role that does not exist or is not held is a no-op.
    #[instrument(skip(self), fields(principal_id = %id, role_id = %role_id), err)]
    pub async fn remove_role(&self, actor: Actor, id: PrincipalId, role_id: RoleId) -> ServiceResult<()> {
        let principal = self.require_principal(id).await?;
        let Some(role) = self.store.find_role(role_id).await? else {
            return Ok(());
        };
        if !self.holds(id, role_id).await? {
            return Ok(());
        }
        self.engine
            .remove_from_role(id, &role.name)
            .await
            .map_err(ServiceError::failed)?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::RemoveRole, entity_names::USER_ROLE, link_id(id, role_id))
                    .with_description(format!(
                        "removed role '{}' from user '{}'",
                        role.name, principal.user_name
                    )),
            )
            .await?;
        Ok(())
    }

    /// Active → Blocked. Blocking a blocked account changes nothing.
    #[instrument(skip(self), fields(principal_id = %id), err)]
    pub async fn block(&self, actor: Actor, id: PrincipalId) -> ServiceResult<PrincipalDto> {
        let mut principal = self.require_principal(id).await?;
        if principal.block(self.clock.now()) {
            self.engine
                .update(&principal)
                .await
                .map_err(ServiceError::failed)?;
            self.audit
                .record(AuditEntry::new(actor, AuditAction::BlockUser, entity_names::USER, id))
                .await?;
        }
        self.shape(principal).await
    }

    /// Blocked → Active. Unblocking an active account changes nothing.
    #[instrument(skip(self), fields(principal_id = %id), err)]
    pub async fn unblock(&self, actor: Actor, id: PrincipalId) -> ServiceResult<PrincipalDto> {
        let mut principal = self.require_principal(id).await?;
        if principal.unblock(self.clock.now()) {
            self.engine
                .update(&principal)
                .await
                .map_err(ServiceError::failed)?;
            self.audit
                .record(AuditEntry::new(actor, AuditAction::UnblockUser, entity_names::USER, id))
                .await?;
        }
        self.shape(principal).await
    }

    #[instrument(skip(self, profile), fields(principal_id = %id), err)]
    pub async fn update_profile(
        &self,
        actor: Actor,
        id: PrincipalId,
        profile: ProfileDto,
    ) -> ServiceResult<PrincipalDto> {
        let mut principal = self.require_principal(id).await?;
        let profile = Profile::from(profile);
        profile.ensure_valid()?;

        self.store.upsert_profile(id, &profile).await?;
        principal.touch(self.clock.now());
        self.engine
            .update(&principal)
            .await
            .map_err(ServiceError::failed)?;

        self.audit
            .record(
                AuditEntry::new(actor, AuditAction::UpdateProfile, entity_names::PROFILE, id)
                    .with_description(format!("updated profile of '{}'", profile.full_name())),
            )
            .await?;
        self.shape(principal).await
    }

    /// Stamp `last_login_at`.
    #[instrument(skip(self), fields(principal_id = %id), err)]
    pub async fn record_login(&self, id: PrincipalId) -> ServiceResult<PrincipalDto> {
        let mut principal = self.require_principal(id).await?;
        principal.record_login(self.clock.now());
        self.engine
            .update(&principal)
            .await
            .map_err(ServiceError::failed)?;
        self.audit
            .record(AuditEntry::new(Actor::Principal(id), AuditAction::Login, entity_names::USER, id))
            .await?;
        self.shape(principal).await
    }

    #[instrument(skip(self), fields(principal_id = %id), err)]
    pub async fn record_logout(&self, id: PrincipalId) -> ServiceResult<()> {
        self.require_principal(id).await?;
        self.audit
            .record(AuditEntry::new(Actor::Principal(id), AuditAction::Logout, entity_names::USER, id))
            .await?;
        Ok(())
    }

    /// Union of active grants and claims over every role the principal holds.
    pub async fn effective_permissions(&self, id: PrincipalId) -> ServiceResult<EffectivePermissions> {
        self.require_principal(id).await?;

        let mut roles = BTreeSet::new();
        let mut permissions = BTreeSet::new();
        let mut claims = BTreeSet::new();
        for role in self.held_roles(id).await? {
            for grant in self.store.list_role_permissions(role.id, false).await? {
                permissions.insert(grant.permission.as_str().to_string());
            }
            for claim in self.store.list_role_claims(role.id).await? {
                claims.insert((claim.claim_type, claim.claim_value));
            }
            roles.insert(role.name);
        }

        Ok(EffectivePermissions {
            principal_id: id,
            roles: roles.into_iter().collect(),
            permissions: permissions.into_iter().collect(),
            claims: claims
                .into_iter()
                .map(|(claim_type, claim_value)| ClaimPair {
                    claim_type,
                    claim_value,
                })
                .collect(),
        })
    }

    // ── helpers ─────────────────────────────────────────────────────────────

    async fn require_principal(&self, id: PrincipalId) -> ServiceResult<Principal> {
        self.engine
            .find_by_id(id)
            .await
            .map_err(ServiceError::failed)?
            .ok_or_else(|| ServiceError::not_found(format!("principal {id}")))
    }

    async fn require_profile(&self, id: PrincipalId) -> ServiceResult<Profile> {
        self.store
            .find_profile(id)
            .await?
            .ok_or_else(|| ServiceError::not_found(format!("profile of principal {id}")))
    }

    async fn holds(&self, id: PrincipalId, role_id: RoleId) -> ServiceResult<bool> {
        Ok(self
            .store
            .list_user_roles_by_principal(id)
            .await?
            .iter()
            .any(|link| link.role_id == role_id))
    }

    async fn held_roles(&self, id: PrincipalId) -> ServiceResult<Vec<Role>> {
        let mut roles = Vec::new();
        for link in self.store.list_user_roles_by_principal(id).await? {
            if let Some(role) = self.store.find_role(link.role_id).await? {
                roles.push(role);
            }
        }
        Ok(roles)
    }

    async fn shape(&self, principal: Principal) -> ServiceResult<PrincipalDto> {
        let profile = self.store.find_profile(principal.id).await?;
        let mut roles: Vec<String> = self
            .held_roles(principal.id)
            .await?
            .into_iter()
            .map(|r| r.name)
            .collect();
        roles.sort();
        Ok(PrincipalDto::from_parts(principal, profile, roles))
    }
}

fn link_id(principal_id: PrincipalId, role_id: RoleId) -> String {
    format!("{principal_id}:{role_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::{ClaimRequest, CreateRoleRequest, RoleDto};
    use crate::wiring::{IdentityServices, SharedAudit, SharedEngine, SharedStore};
    use aeternum_auth::{AuditLog, PermissionCatalog};
    use aeternum_core::ManualClock;
    use aeternum_infra::{
        AuditError, AuditFilter, IdentityFailure, InMemoryIdentityStore, StoreAuditSink,
        StoreError, StoreIdentityEngine,
    };
    use chrono::{NaiveDate, Utc};

    fn services() -> IdentityServices {
        IdentityServices::in_memory(Arc::new(ManualClock::starting_at(Utc::now())))
    }

    fn services_with(
        wrap_engine: impl FnOnce(SharedEngine) -> SharedEngine,
        audit: Option<SharedAudit>,
    ) -> IdentityServices {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_at(Utc::now()));
        let store: SharedStore = Arc::new(InMemoryIdentityStore::new());
        let audit: SharedAudit = match audit {
            Some(audit) => audit,
            None => Arc::new(StoreAuditSink::new(store.clone(), clock.clone())),
        };
        let engine = wrap_engine(Arc::new(StoreIdentityEngine::new(store.clone(), clock.clone())));
        let roles = Arc::new(RoleService::new(
            store.clone(),
            audit.clone(),
            PermissionCatalog::builtin(),
            clock.clone(),
        ));
        let principals = PrincipalService::new(store.clone(), engine, roles.clone(), audit, clock);
        IdentityServices {
            store,
            roles,
            principals,
        }
    }

    /// Delegates to a real engine but refuses role links and account updates.
    struct RefusingEngine(SharedEngine);

    #[async_trait::async_trait]
    impl IdentityEngine for RefusingEngine {
        async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, IdentityFailure> {
            self.0.find_by_id(id).await
        }

        async fn create(&self, principal: &Principal) -> Result<(), IdentityFailure> {
            self.0.create(principal).await
        }

        async fn update(&self, _: &Principal) -> Result<(), IdentityFailure> {
            Err(IdentityFailure::single("account is locked for maintenance"))
        }

        async fn delete(&self, id: PrincipalId) -> Result<(), IdentityFailure> {
            self.0.delete(id).await
        }

        async fn add_to_role(&self, _: PrincipalId, _: &str) -> Result<(), IdentityFailure> {
            Err(IdentityFailure::new(vec![
                "role links are locked".to_string(),
                "try again later".to_string(),
            ]))
        }

        async fn remove_from_role(&self, id: PrincipalId, role: &str) -> Result<(), IdentityFailure> {
            self.0.remove_from_role(id, role).await
        }
    }

    struct BrokenAudit;

    #[async_trait::async_trait]
    impl AuditSink for BrokenAudit {
        async fn record(&self, _: AuditEntry) -> Result<AuditLog, AuditError> {
            Err(AuditError::Store(StoreError::backend("audit table unavailable")))
        }
    }

    fn profile(first: &str, last: &str) -> ProfileDto {
        ProfileDto {
            first_name: first.to_string(),
            last_name: last.to_string(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 5, 17).unwrap(),
            profile_picture_url: None,
            street_address: None,
            city: None,
            postal_code: None,
            country: None,
        }
    }

    fn new_user(name: &str) -> CreatePrincipalRequest {
        CreatePrincipalRequest {
            user_name: name.to_string(),
            email: format!("{name}@example.com"),
            profile: profile("Alice", "Smith"),
        }
    }

    async fn role(services: &IdentityServices, name: &str) -> RoleDto {
        services
            .roles
            .create(
                Actor::System,
                CreateRoleRequest {
                    name: name.to_string(),
                    description: None,
                },
            )
            .await
            .unwrap()
    }

    async fn trail(services: &IdentityServices, entity: &str, id: impl ToString) -> Vec<AuditAction> {
        services
            .store
            .list_audit_logs(&AuditFilter::for_entity(entity, id))
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.action)
            .collect()
    }

    #[tokio::test]
    async fn alice_gains_and_loses_the_editor_role() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();
        let editor = role(&services, "Editor").await;

        services
            .principals
            .assign_role(Actor::System, alice.id, editor.id)
            .await
            .unwrap();
        let fetched = services.principals.get_by_id(alice.id).await.unwrap();
        assert_eq!(fetched.roles, vec!["Editor".to_string()]);

        services
            .principals
            .remove_role(Actor::System, alice.id, editor.id)
            .await
            .unwrap();
        let fetched = services.principals.get_by_id(alice.id).await.unwrap();
        assert!(fetched.roles.is_empty());
    }

    #[tokio::test]
    async fn assigning_twice_leaves_one_link() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();
        let editor = role(&services, "Editor").await;

        for _ in 0..2 {
            services
                .principals
                .assign_role(Actor::System, alice.id, editor.id)
                .await
                .unwrap();
        }

        assert_eq!(
            services.store.list_user_roles_by_principal(alice.id).await.unwrap().len(),
            1
        );
        let link = format!("{}:{}", alice.id, editor.id);
        assert_eq!(
            trail(&services, entity_names::USER_ROLE, link).await,
            vec![AuditAction::AddRole]
        );
    }

    #[tokio::test]
    async fn removing_an_unassigned_or_unknown_role_succeeds() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();
        let editor = role(&services, "Editor").await;

        services
            .principals
            .remove_role(Actor::System, alice.id, editor.id)
            .await
            .unwrap();
        services
            .principals
            .remove_role(Actor::System, alice.id, RoleId::new())
            .await
            .unwrap();

        let err = services
            .principals
            .remove_role(Actor::System, PrincipalId::new(), editor.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn assigning_a_missing_role_is_not_found() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();

        let err = services
            .principals
            .assign_role(Actor::System, alice.id, RoleId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn engine_refusal_on_assign_is_a_failure() {
        let services = services_with(|inner| -> SharedEngine { Arc::new(RefusingEngine(inner)) }, None);
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();
        let editor = role(&services, "Editor").await;

        let err = services
            .principals
            .assign_role(Actor::System, alice.id, editor.id)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Failure(vec![
                "role links are locked".to_string(),
                "try again later".to_string(),
            ])
        );
    }

    #[tokio::test]
    async fn refused_update_leaves_profile_and_account_untouched() {
        let services = services_with(|inner| -> SharedEngine { Arc::new(RefusingEngine(inner)) }, None);
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();

        let err = services
            .principals
            .update(
                Actor::System,
                alice.id,
                UpdatePrincipalRequest {
                    first_name: "Alicia".to_string(),
                    last_name: "Jones".to_string(),
                    is_active: false,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Failure(vec!["account is locked for maintenance".to_string()])
        );

        let after = services.principals.get_by_id(alice.id).await.unwrap();
        assert!(after.is_active);
        assert_eq!(after.updated_at, alice.updated_at);
        assert_eq!(after.profile, alice.profile);
        assert_eq!(
            trail(&services, entity_names::USER, alice.id).await,
            vec![AuditAction::CreateUser]
        );
    }

    #[tokio::test]
    async fn create_rejects_taken_logins_as_validation() {
        let services = services();
        services.principals.create(Actor::System, new_user("alice")).await.unwrap();

        let err = services
            .principals
            .create(Actor::System, new_user("Alice"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Validation(
                "user name 'Alice' is already taken, email 'alice@example.com' is already taken"
                    .to_string()
            )
        );
    }

    #[tokio::test]
    async fn create_validates_the_profile() {
        let services = services();
        let mut request = new_user("bob");
        request.profile.postal_code = Some("12345678901".to_string());
        request.profile.profile_picture_url = Some("not a url".to_string());

        let err = services.principals.create(Actor::System, request).await.unwrap_err();
        assert_eq!(
            err,
            ServiceError::Validation(
                "postal code must not exceed 10 characters, profile picture URL must be a valid URL"
                    .to_string()
            )
        );
        assert!(services.principals.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn new_principals_start_active_with_a_profile() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();

        assert!(alice.is_active);
        assert!(!alice.is_blocked);
        assert_eq!(alice.profile.as_ref().map(|p| p.first_name.as_str()), Some("Alice"));
        assert_eq!(
            trail(&services, entity_names::USER, alice.id).await,
            vec![AuditAction::CreateUser]
        );
    }

    #[tokio::test]
    async fn block_then_unblock_restores_state_and_advances_updated_at() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();

        let blocked = services.principals.block(Actor::System, alice.id).await.unwrap();
        assert!(blocked.is_blocked);
        assert!(blocked.blocked_at.is_some());
        assert!(blocked.updated_at > alice.updated_at);

        let unblocked = services.principals.unblock(Actor::System, alice.id).await.unwrap();
        assert!(!unblocked.is_blocked);
        assert_eq!(unblocked.blocked_at, None);
        assert!(unblocked.updated_at > blocked.updated_at);
        assert_eq!(unblocked.created_at, alice.created_at);
    }

    #[tokio::test]
    async fn repeating_a_block_state_is_silent() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();

        let first = services.principals.block(Actor::System, alice.id).await.unwrap();
        let second = services.principals.block(Actor::System, alice.id).await.unwrap();
        assert_eq!(first.blocked_at, second.blocked_at);
        assert_eq!(first.updated_at, second.updated_at);
        services.principals.unblock(Actor::System, alice.id).await.unwrap();
        services.principals.unblock(Actor::System, alice.id).await.unwrap();

        assert_eq!(
            trail(&services, entity_names::USER, alice.id).await,
            vec![AuditAction::CreateUser, AuditAction::BlockUser, AuditAction::UnblockUser]
        );
    }

    #[tokio::test]
    async fn update_requires_names_and_an_existing_principal() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();

        let err = services
            .principals
            .update(
                Actor::System,
                alice.id,
                UpdatePrincipalRequest {
                    first_name: " ".to_string(),
                    last_name: "Smith".to_string(),
                    is_active: true,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, ServiceError::Validation("first name cannot be empty".to_string()));

        let err = services
            .principals
            .update(
                Actor::System,
                PrincipalId::new(),
                UpdatePrincipalRequest {
                    first_name: "A".to_string(),
                    last_name: "B".to_string(),
                    is_active: true,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let actor = Actor::Principal(alice.id);
        let updated = services
            .principals
            .update(
                actor,
                alice.id,
                UpdatePrincipalRequest {
                    first_name: "Alicia".to_string(),
                    last_name: "Jones".to_string(),
                    is_active: false,
                },
            )
            .await
            .unwrap();
        assert!(!updated.is_active);
        assert_eq!(updated.profile.map(|p| p.first_name), Some("Alicia".to_string()));
        assert!(updated.updated_at > alice.updated_at);

        let logs = services
            .store
            .list_audit_logs(
                &AuditFilter::for_entity(entity_names::USER, alice.id).with_action(AuditAction::UpdateUser),
            )
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].is_sensitive());
        assert_eq!(logs[0].changed_by, Some(alice.id));
    }

    #[tokio::test]
    async fn delete_cascades_but_audit_survives() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();
        let editor = role(&services, "Editor").await;
        services
            .principals
            .assign_role(Actor::System, alice.id, editor.id)
            .await
            .unwrap();

        services.principals.delete(Actor::System, alice.id).await.unwrap();

        assert!(matches!(
            services.principals.get_by_id(alice.id).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(services.store.find_profile(alice.id).await.unwrap().is_none());
        assert!(services.store.list_user_roles_by_role(editor.id).await.unwrap().is_empty());
        assert_eq!(
            trail(&services, entity_names::USER, alice.id).await,
            vec![AuditAction::CreateUser, AuditAction::DeleteUser]
        );
        assert!(matches!(
            services.principals.delete(Actor::System, alice.id).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deleting_a_role_drops_it_from_principals() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();
        let editor = role(&services, "Editor").await;
        services
            .principals
            .assign_role(Actor::System, alice.id, editor.id)
            .await
            .unwrap();

        services.roles.delete(Actor::System, editor.id).await.unwrap();

        assert!(services.principals.get_by_id(alice.id).await.unwrap().roles.is_empty());
    }

    #[tokio::test]
    async fn profile_updates_are_validated_and_audited() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();

        let mut changed = profile("Alice", "Smith");
        changed.country = Some("x".repeat(51));
        let err = services
            .principals
            .update_profile(Actor::System, alice.id, changed.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        changed.country = Some("Norway".to_string());
        changed.profile_picture_url = Some("https://cdn.example.com/alice.png".to_string());
        let updated = services
            .principals
            .update_profile(Actor::System, alice.id, changed)
            .await
            .unwrap();
        assert_eq!(updated.profile.and_then(|p| p.country), Some("Norway".to_string()));
        assert!(updated.updated_at > alice.updated_at);
        assert_eq!(
            trail(&services, entity_names::PROFILE, alice.id).await,
            vec![AuditAction::UpdateProfile]
        );
    }

    #[tokio::test]
    async fn login_and_logout_are_recorded_against_the_principal() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();

        let after = services.principals.record_login(alice.id).await.unwrap();
        assert!(after.last_login_at.is_some());
        services.principals.record_logout(alice.id).await.unwrap();

        let logs = services
            .store
            .list_audit_logs(&AuditFilter {
                changed_by: Some(alice.id),
                ..AuditFilter::default()
            })
            .await
            .unwrap();
        let actions: Vec<AuditAction> = logs.iter().map(|l| l.action).collect();
        assert_eq!(actions, vec![AuditAction::Login, AuditAction::Logout]);
    }

    #[tokio::test]
    async fn effective_permissions_union_over_roles() {
        let services = services();
        let alice = services.principals.create(Actor::System, new_user("alice")).await.unwrap();
        let editor = role(&services, "Editor").await;
        let auditor = role(&services, "Auditor").await;

        services
            .roles
            .add_permission(Actor::System, editor.id, "CanEditArticle")
            .await
            .unwrap();
        services
            .roles
            .add_permission(Actor::System, auditor.id, "CanViewReports")
            .await
            .unwrap();
        services
            .roles
            .add_permission(Actor::System, auditor.id, "CanEditArticle")
            .await
            .unwrap();
        services
            .roles
            .add_permission(Actor::System, auditor.id, "CanDeleteUser")
            .await
            .unwrap();
        services
            .roles
            .remove_permission(Actor::System, auditor.id, "CanDeleteUser")
            .await
            .unwrap();
        services
            .roles
            .add_claim(
                Actor::System,
                editor.id,
                ClaimRequest {
                    claim_type: "department".to_string(),
                    claim_value: "news".to_string(),
                },
            )
            .await
            .unwrap();

        for r in [&editor, &auditor] {
            services
                .principals
                .assign_role(Actor::System, alice.id, r.id)
                .await
                .unwrap();
        }

        let effective = services.principals.effective_permissions(alice.id).await.unwrap();
        assert_eq!(effective.roles, vec!["Auditor".to_string(), "Editor".to_string()]);
        assert_eq!(
            effective.permissions,
            vec!["CanEditArticle".to_string(), "CanViewReports".to_string()]
        );
        assert!(effective.allows("canviewreports"));
        assert!(!effective.allows("CanDeleteUser"));
        assert_eq!(effective.claims.len(), 1);
        assert_eq!(effective.claims[0].claim_value, "news");
    }

    #[tokio::test]
    async fn audit_failures_are_surfaced() {
        let services = services_with(|engine| engine, Some(Arc::new(BrokenAudit)));

        let err = services
            .roles
            .create(
                Actor::System,
                CreateRoleRequest {
                    name: "Editor".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::Failure(vec![
                "audit write failed: store backend error: audit table unavailable".to_string()
            ])
        );
    }

    #[tokio::test]
    async fn get_all_returns_every_principal_in_name_order() {
        let services = services();
        services.principals.create(Actor::System, new_user("zoe")).await.unwrap();
        services.principals.create(Actor::System, new_user("adam")).await.unwrap();

        let names: Vec<String> = services
            .principals
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.user_name)
            .collect();
        assert_eq!(names, vec!["adam".to_string(), "zoe".to_string()]);
    }
}
