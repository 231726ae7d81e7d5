//! Store configuration and wiring.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `USE_PERSISTENT_STORES` | `false` | Use Postgres instead of the in-memory store |
//! | `DATABASE_URL` | (none) | Required when persistent stores are enabled |
//! | `DATABASE_MAX_CONNECTIONS` | `5` | Pool size |

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use crate::store::{IdentityStore, InMemoryIdentityStore, PostgresIdentityStore};

pub const USE_PERSISTENT_STORES: &str = "USE_PERSISTENT_STORES";
pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DATABASE_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set when USE_PERSISTENT_STORES=true")]
    MissingDatabaseUrl,

    #[error("invalid value for {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },

    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("failed to apply schema: {0}")]
    Migrate(#[source] sqlx::migrate::MigrateError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            use_persistent_stores: false,
            database_url: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let use_persistent_stores = lookup(USE_PERSISTENT_STORES)
            .unwrap_or_else(|| "false".to_string())
            .trim()
            .parse::<bool>()
            .unwrap_or(false);

        let database_url = lookup(DATABASE_URL).filter(|u| !u.trim().is_empty());
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        let max_connections = match lookup(DATABASE_MAX_CONNECTIONS) {
            None => DEFAULT_MAX_CONNECTIONS,
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidValue {
                    var: DATABASE_MAX_CONNECTIONS,
                    value: raw,
                })?,
        };

        Ok(Self {
            use_persistent_stores,
            database_url,
            max_connections,
        })
    }
}

/// Open a pool and bring the schema up to date.
pub async fn connect_postgres(url: &str, max_connections: u32) -> Result<PgPool, ConfigError> {
    tracing::info!(max_connections, "connecting to PostgreSQL");

    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(url)
        .await
        .map_err(ConfigError::Connect)?;

    apply_schema(&pool).await?;
    Ok(pool)
}

/// Apply the embedded migrations (`crates/infra/migrations`).
pub async fn apply_schema(pool: &PgPool) -> Result<(), ConfigError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(ConfigError::Migrate)?;
    tracing::info!("identity schema applied");
    Ok(())
}

/// Build the identity store selected by `config`.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn IdentityStore>, ConfigError> {
    match (&config.database_url, config.use_persistent_stores) {
        (Some(url), true) => {
            let pool = connect_postgres(url, config.max_connections).await?;
            Ok(Arc::new(PostgresIdentityStore::new(pool)))
        }
        (None, true) => Err(ConfigError::MissingDatabaseUrl),
        (_, false) => {
            tracing::warn!("USE_PERSISTENT_STORES is not enabled, using in-memory identity store");
            Ok(Arc::new(InMemoryIdentityStore::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_in_memory() {
        let config = StoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn unparseable_flag_means_false() {
        let config = StoreConfig::from_lookup(lookup(&[(USE_PERSISTENT_STORES, "yes")])).unwrap();
        assert!(!config.use_persistent_stores);
    }

    #[test]
    fn persistent_requires_a_url() {
        let err = StoreConfig::from_lookup(lookup(&[(USE_PERSISTENT_STORES, "true")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingDatabaseUrl));

        let config = StoreConfig::from_lookup(lookup(&[
            (USE_PERSISTENT_STORES, "true"),
            (DATABASE_URL, "postgres://localhost/aeternum"),
            (DATABASE_MAX_CONNECTIONS, "12"),
        ]))
        .unwrap();
        assert!(config.use_persistent_stores);
        assert_eq!(config.max_connections, 12);
    }

    #[test]
    fn pool_size_must_be_positive() {
        let err = StoreConfig::from_lookup(lookup(&[(DATABASE_MAX_CONNECTIONS, "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var: DATABASE_MAX_CONNECTIONS, .. }
        ));
    }

    #[tokio::test]
    async fn in_memory_store_is_built_without_a_database() {
        let store = build_store(&StoreConfig::default()).await.unwrap();
        assert!(store.list_roles().await.unwrap().is_empty());
    }
}
