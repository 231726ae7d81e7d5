//! Append-only audit trail records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aeternum_core::error::{require_max_len, require_non_empty};
use aeternum_core::{AuditLogId, DomainError, DomainResult, Entity, PrincipalId};

/// Kind of mutating action recorded in the audit trail (closed set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    UpdateUser,
    ChangePassword,
    BlockUser,
    UnblockUser,
    AddRole,
    RemoveRole,
    UpdateRole,
    UpdateProfile,
    AssignPermission,
    RevokePermission,
    Login,
    Logout,
    CreateUser,
    DeleteUser,
}

impl AuditAction {
    pub const ALL: [AuditAction; 14] = [
        AuditAction::UpdateUser,
        AuditAction::ChangePassword,
        AuditAction::BlockUser,
        AuditAction::UnblockUser,
        AuditAction::AddRole,
        AuditAction::RemoveRole,
        AuditAction::UpdateRole,
        AuditAction::UpdateProfile,
        AuditAction::AssignPermission,
        AuditAction::RevokePermission,
        AuditAction::Login,
        AuditAction::Logout,
        AuditAction::CreateUser,
        AuditAction::DeleteUser,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UpdateUser => "UpdateUser",
            AuditAction::ChangePassword => "ChangePassword",
            AuditAction::BlockUser => "BlockUser",
            AuditAction::UnblockUser => "UnblockUser",
            AuditAction::AddRole => "AddRole",
            AuditAction::RemoveRole => "RemoveRole",
            AuditAction::UpdateRole => "UpdateRole",
            AuditAction::UpdateProfile => "UpdateProfile",
            AuditAction::AssignPermission => "AssignPermission",
            AuditAction::RevokePermission => "RevokePermission",
            AuditAction::Login => "Login",
            AuditAction::Logout => "Logout",
            AuditAction::CreateUser => "CreateUser",
            AuditAction::DeleteUser => "DeleteUser",
        }
    }

    /// Actions flagged for downstream alerting.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, AuditAction::UpdateUser | AuditAction::ChangePassword)
    }
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AuditAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown audit action '{s}'")))
    }
}

/// Who performed an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Actor {
    /// System-initiated; recorded with no actor.
    #[default]
    System,
    Principal(PrincipalId),
}

impl Actor {
    pub fn principal_id(&self) -> Option<PrincipalId> {
        match self {
            Actor::System => None,
            Actor::Principal(id) => Some(*id),
        }
    }
}

/// Well-known entity names used as audit targets.
pub mod entity_names {
    pub const USER: &str = "User";
    pub const PROFILE: &str = "Profile";
    pub const ROLE: &str = "Role";
    pub const USER_ROLE: &str = "UserRole";
    pub const ROLE_PERMISSION: &str = "RolePermission";
    pub const ROLE_CLAIM: &str = "RoleClaim";
}

/// What a service hands to the audit sink at the end of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub actor: Actor,
    pub action: AuditAction,
    pub entity_name: &'static str,
    pub entity_id: String,
    pub description: String,
}

impl AuditEntry {
    pub fn new(
        actor: Actor,
        action: AuditAction,
        entity_name: &'static str,
        entity_id: impl ToString,
    ) -> Self {
        Self {
            actor,
            action,
            entity_name,
            entity_id: entity_id.to_string(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Persisted audit record.
///
/// Subjects are referenced by denormalized name/id strings so records outlive
/// the entities they describe. Immutable once written, except for
/// `updated_at`, which only backfill tooling sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: AuditLogId,
    pub action: AuditAction,
    pub description: String,
    pub entity_name: String,
    pub entity_id: String,
    pub changed_by: Option<PrincipalId>,
    pub timestamp: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AuditLog {
    pub const MAX_DESCRIPTION_LEN: usize = 1000;

    pub fn record(id: AuditLogId, entry: AuditEntry, now: DateTime<Utc>) -> DomainResult<Self> {
        require_non_empty("audit entity name", entry.entity_name)?;
        require_non_empty("audit entity id", &entry.entity_id)?;
        require_max_len(
            "audit description",
            &entry.description,
            Self::MAX_DESCRIPTION_LEN,
        )?;
        Ok(Self {
            id,
            action: entry.action,
            description: entry.description,
            entity_name: entry.entity_name.to_string(),
            entity_id: entry.entity_id,
            changed_by: entry.actor.principal_id(),
            timestamp: now,
            updated_at: None,
        })
    }

    pub fn is_sensitive(&self) -> bool {
        self.action.is_sensitive()
    }

    pub fn format_timestamp(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn details(&self) -> String {
        let changed_by = self
            .changed_by
            .map(|id| id.to_string())
            .unwrap_or_else(|| "system".to_string());
        format!(
            "Action: {}, Entity: {}, Entity ID: {}, Timestamp: {}, Changed By: {}",
            self.action,
            self.entity_name,
            self.entity_id,
            self.format_timestamp(),
            changed_by
        )
    }

    /// Backfill marker.
    pub fn mark_modified(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}

impl Entity for AuditLog {
    type Id = AuditLogId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn only_user_update_and_password_change_are_sensitive() {
        let sensitive: Vec<_> = AuditAction::ALL
            .into_iter()
            .filter(AuditAction::is_sensitive)
            .collect();
        assert_eq!(
            sensitive,
            vec![AuditAction::UpdateUser, AuditAction::ChangePassword]
        );
    }

    #[test]
    fn action_names_parse_back() {
        for action in AuditAction::ALL {
            assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), action);
        }
        assert!("Teleport".parse::<AuditAction>().is_err());
    }

    #[test]
    fn system_actions_have_no_actor() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 5).unwrap();
        let entry = AuditEntry::new(Actor::System, AuditAction::DeleteUser, entity_names::USER, "42");
        let log = AuditLog::record(AuditLogId::new(), entry, now).unwrap();
        assert_eq!(log.changed_by, None);
        assert_eq!(
            log.details(),
            "Action: DeleteUser, Entity: User, Entity ID: 42, Timestamp: 2024-06-01 12:00:05, Changed By: system"
        );
    }

    #[test]
    fn description_is_bounded() {
        let entry = AuditEntry::new(Actor::System, AuditAction::UpdateRole, entity_names::ROLE, "r")
            .with_description("x".repeat(1001));
        let err = AuditLog::record(AuditLogId::new(), entry, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn mark_modified_sets_backfill_marker_only() {
        let now = Utc::now();
        let entry = AuditEntry::new(Actor::System, AuditAction::Login, entity_names::USER, "1");
        let mut log = AuditLog::record(AuditLogId::new(), entry, now).unwrap();
        let later = now + chrono::Duration::days(1);
        log.mark_modified(later);
        assert_eq!(log.timestamp, now);
        assert_eq!(log.updated_at, Some(later));
    }
}
