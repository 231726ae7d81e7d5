//! Composition root: one store, one engine, one audit sink shared by both
//! services.

use std::sync::Arc;

use aeternum_auth::PermissionCatalog;
use aeternum_core::{Clock, SystemClock};
use aeternum_infra::{
    AuditSink, ConfigError, IdentityEngine, IdentityStore, InMemoryIdentityStore, StoreAuditSink,
    StoreConfig, StoreIdentityEngine, build_store,
};

use crate::principal_service::PrincipalService;
use crate::role_service::RoleService;

pub type SharedStore = Arc<dyn IdentityStore>;
pub type SharedEngine = Arc<dyn IdentityEngine>;
pub type SharedAudit = Arc<dyn AuditSink>;

pub type DefaultRoleService = RoleService<SharedStore, SharedAudit>;
pub type DefaultPrincipalService = PrincipalService<SharedStore, SharedEngine, SharedAudit>;

pub struct IdentityServices {
    pub store: SharedStore,
    pub roles: Arc<DefaultRoleService>,
    pub principals: DefaultPrincipalService,
}

impl IdentityServices {
    pub fn new(store: SharedStore, catalog: PermissionCatalog, clock: Arc<dyn Clock>) -> Self {
        let audit: SharedAudit = Arc::new(StoreAuditSink::new(store.clone(), clock.clone()));
        let engine: SharedEngine = Arc::new(StoreIdentityEngine::new(store.clone(), clock.clone()));
        let roles = Arc::new(RoleService::new(
            store.clone(),
            audit.clone(),
            catalog,
            clock.clone(),
        ));
        let principals = PrincipalService::new(store.clone(), engine, roles.clone(), audit, clock);
        Self {
            store,
            roles,
            principals,
        }
    }

    /// In-memory wiring (dev/test).
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self::new(
            Arc::new(InMemoryIdentityStore::new()),
            PermissionCatalog::builtin(),
            clock,
        )
    }
}

/// Wire services against the store selected by `config`, using the system clock.
pub async fn build_services(config: &StoreConfig) -> Result<IdentityServices, ConfigError> {
    let store = build_store(config).await?;
    Ok(IdentityServices::new(
        store,
        PermissionCatalog::builtin(),
        Arc::new(SystemClock),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::CreateRoleRequest;
    use aeternum_auth::Actor;

    #[tokio::test]
    async fn default_config_wires_shared_in_memory_store() {
        let services = build_services(&StoreConfig::default()).await.unwrap();
        let role = services
            .roles
            .create(
                Actor::System,
                CreateRoleRequest {
                    name: "Editor".to_string(),
                    description: None,
                },
            )
            .await
            .unwrap();

        assert!(services.store.find_role(role.id).await.unwrap().is_some());
    }
}
