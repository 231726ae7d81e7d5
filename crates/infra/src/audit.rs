//! Audit emission.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use aeternum_auth::{AuditEntry, AuditLog};
use aeternum_core::{AuditLogId, Clock, DomainError};

use crate::store::{IdentityStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    #[error("invalid audit record: {0}")]
    Invalid(#[from] DomainError),

    #[error("audit write failed: {0}")]
    Store(#[from] StoreError),
}

/// Destination for audit records. Services call it once per successful
/// mutating operation.
#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<AuditLog, AuditError>;
}

#[async_trait::async_trait]
impl<A> AuditSink for Arc<A>
where
    A: AuditSink + ?Sized,
{
    async fn record(&self, entry: AuditEntry) -> Result<AuditLog, AuditError> {
        (**self).record(entry).await
    }
}

/// Appends audit records to the identity store.
///
/// Sensitive actions are additionally logged at `warn` so they can be picked up
/// by log-based alerting.
pub struct StoreAuditSink<S> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: IdentityStore> StoreAuditSink<S> {
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }
}

#[async_trait::async_trait]
impl<S: IdentityStore> AuditSink for StoreAuditSink<S> {
    async fn record(&self, entry: AuditEntry) -> Result<AuditLog, AuditError> {
        let log = AuditLog::record(AuditLogId::new(), entry, self.clock.now())?;
        self.store.append_audit_log(&log).await?;

        if log.is_sensitive() {
            warn!(
                audit_id = %log.id,
                action = %log.action,
                entity = %log.entity_name,
                entity_id = %log.entity_id,
                "sensitive action recorded"
            );
        } else {
            info!(
                audit_id = %log.id,
                action = %log.action,
                entity = %log.entity_name,
                entity_id = %log.entity_id,
                "audit record appended"
            );
        }
        Ok(log)
    }
}
