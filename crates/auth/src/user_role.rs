use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aeternum_core::{PrincipalId, RoleId};

/// Link between a principal and a role.
///
/// The pair `(principal_id, role_id)` is the key: a principal holds a given
/// role at most once. The store enforces that; this type only carries the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub principal_id: PrincipalId,
    pub role_id: RoleId,
    pub assigned_at: DateTime<Utc>,
}

impl UserRole {
    pub fn new(principal_id: PrincipalId, role_id: RoleId, now: DateTime<Utc>) -> Self {
        Self {
            principal_id,
            role_id,
            assigned_at: now,
        }
    }

    pub fn key(&self) -> (PrincipalId, RoleId) {
        (self.principal_id, self.role_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_the_principal_role_pair() {
        let link = UserRole::new(PrincipalId::new(), RoleId::new(), Utc::now());
        assert_eq!(link.key(), (link.principal_id, link.role_id));
    }
}
