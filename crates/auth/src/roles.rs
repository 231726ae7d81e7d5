use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aeternum_core::error::{require_max_len, require_non_empty};
use aeternum_core::{DomainResult, Entity, RoleId, Timestamped};

/// A named permission group.
///
/// Role names are unique across the system, compared case-insensitively (see
/// [`Role::normalize_name`]). Permissions and claims hang off the role and are
/// deleted with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    pub const MAX_NAME_LEN: usize = 256;
    pub const MAX_DESCRIPTION_LEN: usize = 200;

    pub fn new(
        id: RoleId,
        name: &str,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let role = Self {
            id,
            name: name.trim().to_string(),
            description: normalize_description(description),
            created_at: now,
            updated_at: now,
        };
        role.ensure_valid()?;
        Ok(role)
    }

    pub fn ensure_valid(&self) -> DomainResult<()> {
        validate_name(&self.name)?;
        if let Some(description) = &self.description {
            require_max_len("role description", description, Self::MAX_DESCRIPTION_LEN)?;
        }
        Ok(())
    }

    /// Key used for the case-insensitive uniqueness rule on role names.
    pub fn normalize_name(name: &str) -> String {
        name.trim().to_lowercase()
    }

    pub fn normalized_name(&self) -> String {
        Self::normalize_name(&self.name)
    }

    pub fn rename(&mut self, name: &str, now: DateTime<Utc>) -> DomainResult<()> {
        validate_name(name)?;
        self.name = name.trim().to_string();
        self.touch(now);
        Ok(())
    }

    /// Replace the description; an empty string clears it.
    pub fn update_description(
        &mut self,
        description: Option<String>,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        let description = normalize_description(description);
        if let Some(d) = &description {
            require_max_len("role description", d, Self::MAX_DESCRIPTION_LEN)?;
        }
        self.description = description;
        self.touch(now);
        Ok(())
    }
}

fn validate_name(name: &str) -> DomainResult<()> {
    require_non_empty("role name", name)?;
    require_max_len("role name", name.trim(), Role::MAX_NAME_LEN)
}

fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

impl Entity for Role {
    type Id = RoleId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Timestamped for Role {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aeternum_core::DomainError;
    use chrono::Duration;

    #[test]
    fn new_role_trims_name_and_sets_timestamps() {
        let now = Utc::now();
        let role = Role::new(RoleId::new(), "  Editor ", None, now).unwrap();
        assert_eq!(role.name, "Editor");
        assert_eq!(role.created_at, now);
        assert_eq!(role.updated_at, now);
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = Role::new(RoleId::new(), "  ", None, Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn description_over_200_chars_is_rejected() {
        let long = "d".repeat(201);
        let err = Role::new(RoleId::new(), "Editor", Some(long), Utc::now()).unwrap_err();
        assert!(err.to_string().contains("200"));
    }

    #[test]
    fn blank_description_clears_it() {
        let now = Utc::now();
        let mut role = Role::new(RoleId::new(), "Editor", Some("edits".into()), now).unwrap();
        role.update_description(Some("   ".into()), now + Duration::seconds(1))
            .unwrap();
        assert_eq!(role.description, None);
        assert!(role.updated_at > role.created_at);
    }

    #[test]
    fn normalized_name_is_case_insensitive() {
        assert_eq!(Role::normalize_name(" EDITOR "), Role::normalize_name("editor"));
    }
}
