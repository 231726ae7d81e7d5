//! User account record and its blocked/active state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use aeternum_core::error::require_non_empty;
use aeternum_core::{DomainResult, Entity, PrincipalId, Timestamped};

use crate::profile::validation_failure;

/// Blocked/active state of a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BlockState {
    #[default]
    Active,
    Blocked,
}

impl core::fmt::Display for BlockState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BlockState::Active => write!(f, "Active"),
            BlockState::Blocked => write!(f, "Blocked"),
        }
    }
}

/// A user account.
///
/// # Invariants
/// - `is_blocked == true` implies `blocked_at` is set; unblocking clears both.
/// - Every mutating method refreshes `updated_at`.
/// - A new principal starts `Active`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Principal {
    pub id: PrincipalId,

    #[validate(length(min = 1, max = 256, message = "user name must be 1 to 256 characters"))]
    pub user_name: String,

    #[validate(
        email(message = "email must be a valid address"),
        length(max = 256, message = "email must not exceed 256 characters")
    )]
    pub email: String,

    pub is_active: bool,
    pub is_blocked: bool,
    pub blocked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl Principal {
    pub fn new(
        id: PrincipalId,
        user_name: &str,
        email: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let principal = Self {
            id,
            user_name: user_name.trim().to_string(),
            email: email.trim().to_lowercase(),
            is_active: true,
            is_blocked: false,
            blocked_at: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        principal.ensure_valid()?;
        Ok(principal)
    }

    pub fn ensure_valid(&self) -> DomainResult<()> {
        require_non_empty("user name", &self.user_name)?;
        self.validate().map_err(validation_failure)
    }

    pub fn block_state(&self) -> BlockState {
        if self.is_blocked {
            BlockState::Blocked
        } else {
            BlockState::Active
        }
    }

    /// Active → Blocked. Returns `false` (and changes nothing) if already blocked.
    pub fn block(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_blocked {
            return false;
        }
        self.is_blocked = true;
        self.blocked_at = Some(now);
        self.touch(now);
        true
    }

    /// Blocked → Active. Returns `false` (and changes nothing) if already active.
    pub fn unblock(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_blocked {
            return false;
        }
        self.is_blocked = false;
        self.blocked_at = None;
        self.touch(now);
        true
    }

    pub fn set_active(&mut self, is_active: bool, now: DateTime<Utc>) {
        self.is_active = is_active;
        self.touch(now);
    }

    pub fn record_login(&mut self, now: DateTime<Utc>) {
        self.last_login_at = Some(now);
        self.touch(now);
    }
}

impl Entity for Principal {
    type Id = PrincipalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Timestamped for Principal {
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
