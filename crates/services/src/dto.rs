//! Transport shapes and their explicit conversions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use aeternum_auth::{Principal, Profile, Role, RoleClaim, RolePermission};
use aeternum_core::{ClaimId, PrincipalId, RoleId};

// -------------------------
// Roles
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDto {
    pub id: RoleId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Role> for RoleDto {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            description: role.description,
            created_at: role.created_at,
            updated_at: role.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
}

/// Fields left `None` are kept. An empty description clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionDto {
    pub role_id: RoleId,
    pub permission: String,
    pub assigned_at: DateTime<Utc>,
}

impl From<RolePermission> for RolePermissionDto {
    fn from(grant: RolePermission) -> Self {
        Self {
            role_id: grant.role_id,
            permission: grant.permission.as_str().to_string(),
            assigned_at: grant.assigned_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClaimRequest {
    pub claim_type: String,
    pub claim_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleClaimDto {
    pub id: ClaimId,
    pub role_id: RoleId,
    pub claim_type: String,
    pub claim_value: String,
    pub created_at: DateTime<Utc>,
}

impl From<RoleClaim> for RoleClaimDto {
    fn from(claim: RoleClaim) -> Self {
        Self {
            id: claim.id,
            role_id: claim.role_id,
            claim_type: claim.claim_type,
            claim_value: claim.claim_value,
            created_at: claim.created_at,
        }
    }
}

// -------------------------
// Principals
// -------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDto {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub profile_picture_url: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

impl From<Profile> for ProfileDto {
    fn from(profile: Profile) -> Self {
        Self {
            first_name: profile.first_name,
            last_name: profile.last_name,
            date_of_birth: profile.date_of_birth,
            profile_picture_url: profile.profile_picture_url,
            street_address: profile.street_address,
            city: profile.city,
            postal_code: profile.postal_code,
            country: profile.country,
        }
    }
}

impl From<ProfileDto> for Profile {
    fn from(dto: ProfileDto) -> Self {
        let mut profile = Profile::new(&dto.first_name, &dto.last_name, dto.date_of_birth);
        profile.profile_picture_url = dto.profile_picture_url;
        profile.update_address(dto.street_address, dto.city, dto.postal_code, dto.country);
        profile
    }
}

/// A principal as returned to callers, with its role names and profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrincipalDto {
    pub id: PrincipalId,
    pub user_name: String,
    pub email: String,
    pub is_active: bool,
    pub is_blocked: bool,
    pub blocked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub roles: Vec<String>,
    pub profile: Option<ProfileDto>,
}

impl PrincipalDto {
    pub fn from_parts(principal: Principal, profile: Option<Profile>, roles: Vec<String>) -> Self {
        Self {
            id: principal.id,
            user_name: principal.user_name,
            email: principal.email,
            is_active: principal.is_active,
            is_blocked: principal.is_blocked,
            blocked_at: principal.blocked_at,
            created_at: principal.created_at,
            updated_at: principal.updated_at,
            last_login_at: principal.last_login_at,
            roles,
            profile: profile.map(ProfileDto::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CreatePrincipalRequest {
    pub user_name: String,
    pub email: String,
    pub profile: ProfileDto,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpdatePrincipalRequest {
    pub first_name: String,
    pub last_name: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimPair {
    pub claim_type: String,
    pub claim_value: String,
}

/// Everything a principal is allowed to do, resolved through its roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermissions {
    pub principal_id: PrincipalId,
    /// Sorted role names.
    pub roles: Vec<String>,
    /// Sorted, de-duplicated active grants.
    pub permissions: Vec<String>,
    /// Sorted, de-duplicated claims.
    pub claims: Vec<ClaimPair>,
}

impl EffectivePermissions {
    pub fn allows(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p.eq_ignore_ascii_case(permission))
    }
}
