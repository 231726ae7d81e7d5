//! Identity engine: the collaborator that owns account records.
//!
//! Services never write principals directly; they ask the engine, which
//! enforces login-name uniqueness and the contact-address policy and reports
//! every problem it finds at once.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use aeternum_auth::{Principal, UserRole};
use aeternum_core::{Clock, PrincipalId};

use crate::store::{IdentityStore, StoreError};

/// Aggregated identity-engine failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{}", .messages.join(", "))]
pub struct IdentityFailure {
    pub messages: Vec<String>,
}

impl IdentityFailure {
    pub fn new(messages: Vec<String>) -> Self {
        Self { messages }
    }

    pub fn single(message: impl Into<String>) -> Self {
        Self {
            messages: vec![message.into()],
        }
    }
}

impl From<StoreError> for IdentityFailure {
    fn from(err: StoreError) -> Self {
        Self::single(err.to_string())
    }
}

#[async_trait::async_trait]
pub trait IdentityEngine: Send + Sync {
    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, IdentityFailure>;

    /// Persist a new account. Fails if the login name or contact address is
    /// already in use.
    async fn create(&self, principal: &Principal) -> Result<(), IdentityFailure>;

    async fn update(&self, principal: &Principal) -> Result<(), IdentityFailure>;

    async fn delete(&self, id: PrincipalId) -> Result<(), IdentityFailure>;

    /// Link the principal to the role with this name. Already linked is success.
    async fn add_to_role(&self, id: PrincipalId, role_name: &str) -> Result<(), IdentityFailure>;

    /// Fails if the principal is not in the role.
    async fn remove_from_role(
        &self,
        id: PrincipalId,
        role_name: &str,
    ) -> Result<(), IdentityFailure>;
}

#[async_trait::async_trait]
impl<E> IdentityEngine for Arc<E>
where
    E: IdentityEngine + ?Sized,
{
    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, IdentityFailure> {
        (**self).find_by_id(id).await
    }

    async fn create(&self, principal: &Principal) -> Result<(), IdentityFailure> {
        (**self).create(principal).await
    }

    async fn update(&self, principal: &Principal) -> Result<(), IdentityFailure> {
        (**self).update(principal).await
    }

    async fn delete(&self, id: PrincipalId) -> Result<(), IdentityFailure> {
        (**self).delete(id).await
    }

    async fn add_to_role(&self, id: PrincipalId, role_name: &str) -> Result<(), IdentityFailure> {
        (**self).add_to_role(id, role_name).await
    }

    async fn remove_from_role(
        &self,
        id: PrincipalId,
        role_name: &str,
    ) -> Result<(), IdentityFailure> {
        (**self).remove_from_role(id, role_name).await
    }
}

/// Identity engine that writes through an [`IdentityStore`].
pub struct StoreIdentityEngine<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: IdentityStore> StoreIdentityEngine<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Problems that would make `candidate` clash with another account.
    async fn clashes(&self, candidate: &Principal) -> Result<Vec<String>, IdentityFailure> {
        let mut messages = Vec::new();

        if let Some(existing) = self
            .store
            .find_principal_by_user_name(&candidate.user_name)
            .await?
        {
            if existing.id != candidate.id {
                messages.push(format!(
                    "user name '{}' is already taken",
                    candidate.user_name
                ));
            }
        }

        let email_taken = self
            .store
            .find_principal_by_email(&candidate.email)
            .await?
            .is_some_and(|existing| existing.id != candidate.id);
        if email_taken {
            messages.push(format!("email '{}' is already taken", candidate.email));
        }

        Ok(messages)
    }

    async fn require_principal(&self, id: PrincipalId) -> Result<Principal, IdentityFailure> {
        self.store
            .find_principal(id)
            .await?
            .ok_or_else(|| IdentityFailure::single(format!("principal {id} does not exist")))
    }
}

#[async_trait::async_trait]
impl<S: IdentityStore> IdentityEngine for StoreIdentityEngine<S> {
    async fn find_by_id(&self, id: PrincipalId) -> Result<Option<Principal>, IdentityFailure> {
        Ok(self.store.find_principal(id).await?)
    }

    async fn create(&self, principal: &Principal) -> Result<(), IdentityFailure> {
        let mut messages: Vec<String> = principal
            .ensure_valid()
            .err()
            .map(|e| e.to_string())
            .into_iter()
            .collect();
        messages.extend(self.clashes(principal).await?);
        if !messages.is_empty() {
            return Err(IdentityFailure::new(messages));
        }

        self.store.insert_principal(principal).await?;
        debug!(principal_id = %principal.id, "identity created");
        Ok(())
    }

    async fn update(&self, principal: &Principal) -> Result<(), IdentityFailure> {
        let messages = self.clashes(principal).await?;
        if !messages.is_empty() {
            return Err(IdentityFailure::new(messages));
        }
        self.store.update_principal(principal).await?;
        Ok(())
    }

    async fn delete(&self, id: PrincipalId) -> Result<(), IdentityFailure> {
        self.store.delete_principal(id).await?;
        debug!(principal_id = %id, "identity deleted");
        Ok(())
    }

    async fn add_to_role(&self, id: PrincipalId, role_name: &str) -> Result<(), IdentityFailure> {
        let principal = self.require_principal(id).await?;
        let role = self
            .store
            .find_role_by_name(role_name)
            .await?
            .ok_or_else(|| IdentityFailure::single(format!("role '{role_name}' does not exist")))?;

        let attached = self
            .store
            .attach_user_role(&UserRole::new(principal.id, role.id, self.clock.now()))
            .await?;
        debug!(principal_id = %id, role = %role.name, attached, "add to role");
        Ok(())
    }

    async fn remove_from_role(
        &self,
        id: PrincipalId,
        role_name: &str,
    ) -> Result<(), IdentityFailure> {
        let principal = self.require_principal(id).await?;
        let role = self
            .store
            .find_role_by_name(role_name)
            .await?
            .ok_or_else(|| IdentityFailure::single(format!("role '{role_name}' does not exist")))?;

        if !self.store.detach_user_role(principal.id, role.id).await? {
            return Err(IdentityFailure::single(format!(
                "user '{}' is not in role '{}'",
                principal.user_name, role.name
            )));
        }
        Ok(())
    }
}
