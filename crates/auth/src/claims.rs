use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aeternum_core::error::require_max_len;
use aeternum_core::{ClaimId, DomainError, DomainResult, Entity, RoleId};

/// A `(type, value)` pair asserted about a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleClaim {
    pub id: ClaimId,
    pub role_id: RoleId,
    pub claim_type: String,
    pub claim_value: String,
    /// Reset on every update.
    pub created_at: DateTime<Utc>,
}

impl RoleClaim {
    pub const MAX_PART_LEN: usize = 256;

    pub fn new(
        id: ClaimId,
        role_id: RoleId,
        claim_type: &str,
        claim_value: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        validate_pair(claim_type, claim_value)?;
        Ok(Self {
            id,
            role_id,
            claim_type: claim_type.trim().to_string(),
            claim_value: claim_value.trim().to_string(),
            created_at: now,
        })
    }

    pub fn is_valid(&self) -> bool {
        validate_pair(&self.claim_type, &self.claim_value).is_ok()
    }

    pub fn update(
        &mut self,
        claim_type: &str,
        claim_value: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<()> {
        validate_pair(claim_type, claim_value)?;
        self.claim_type = claim_type.trim().to_string();
        self.claim_value = claim_value.trim().to_string();
        self.created_at = now;
        Ok(())
    }

    pub fn details(&self) -> String {
        format!(
            "Claim Type: {}, Claim Value: {}, Created At: {}",
            self.claim_type,
            self.claim_value,
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

fn validate_pair(claim_type: &str, claim_value: &str) -> DomainResult<()> {
    let presence = match (claim_type.trim().is_empty(), claim_value.trim().is_empty()) {
        (false, false) => Ok(()),
        (true, true) => Err(DomainError::validation(
            "claim type and claim value cannot be empty",
        )),
        (true, false) => Err(DomainError::validation("claim type cannot be empty")),
        (false, true) => Err(DomainError::validation("claim value cannot be empty")),
    };
    presence?;
    require_max_len("claim type", claim_type.trim(), RoleClaim::MAX_PART_LEN)?;
    require_max_len("claim value", claim_value.trim(), RoleClaim::MAX_PART_LEN)
}

impl Entity for RoleClaim {
    type Id = ClaimId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
