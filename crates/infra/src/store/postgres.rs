//! Postgres-backed identity store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate id, role name or user name |
//! | Database (foreign key violation) | `23503` | `NotFound` | Referenced principal/role does not exist |
//! | Database (other) | Any other | `Backend` | Check constraints, type errors, etc. |
//! | PoolClosed / Other | N/A | `Backend` | Network errors, connection failures, etc. |
//!
//! Cascades are enforced by `ON DELETE CASCADE` foreign keys (see
//! `migrations/0001_identity.sql`).

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use aeternum_auth::{
    AuditAction, AuditLog, Permission, Principal, Profile, Role, RoleClaim, RolePermission,
    UserRole,
};
use aeternum_core::{AuditLogId, ClaimId, PrincipalId, RoleId};

use super::r#trait::{AuditFilter, IdentityStore, StoreError};

/// Postgres-backed identity store.
///
/// Uses the SQLx connection pool, which is `Send + Sync`; clones share the pool.
#[derive(Debug, Clone)]
pub struct PostgresIdentityStore {
    pool: Arc<PgPool>,
}

impl PostgresIdentityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const PRINCIPAL_COLUMNS: &str = "id, user_name, email, is_active, is_blocked, blocked_at, \
     created_at, updated_at, last_login_at";
const ROLE_COLUMNS: &str = "id, name, description, created_at, updated_at";
const AUDIT_COLUMNS: &str =
    "id, action, description, entity_name, entity_id, changed_by, timestamp, updated_at";

#[async_trait::async_trait]
impl IdentityStore for PostgresIdentityStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Principals
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, principal), fields(principal_id = %principal.id, operation), err)]
    async fn insert_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        Span::current().record("operation", "insert_principal");

        sqlx::query(
            r#"
            INSERT INTO principals (
                id, user_name, email, is_active, is_blocked, blocked_at,
                created_at, updated_at, last_login_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(principal.id.as_uuid())
        .bind(&principal.user_name)
        .bind(&principal.email)
        .bind(principal.is_active)
        .bind(principal.is_blocked)
        .bind(principal.blocked_at)
        .bind(principal.created_at)
        .bind(principal.updated_at)
        .bind(principal.last_login_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_principal", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(principal_id = %id, operation), err)]
    async fn find_principal(&self, id: PrincipalId) -> Result<Option<Principal>, StoreError> {
        Span::current().record("operation", "find_principal");

        let row = sqlx::query(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_principal", e))?;

        row.map(|r| decode::<PrincipalRow>(&r).map(Principal::from))
            .transpose()
    }

    #[instrument(skip(self), fields(operation), err)]
    async fn find_principal_by_user_name(
        &self,
        user_name: &str,
    ) -> Result<Option<Principal>, StoreError> {
        Span::current().record("operation", "find_principal_by_user_name");

        let row = sqlx::query(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE lower(user_name) = lower($1)"
        ))
        .bind(user_name.trim())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_principal_by_user_name", e))?;

        row.map(|r| decode::<PrincipalRow>(&r).map(Principal::from))
            .transpose()
    }

    #[instrument(skip(self), fields(operation), err)]
    async fn find_principal_by_email(&self, email: &str) -> Result<Option<Principal>, StoreError> {
        Span::current().record("operation", "find_principal_by_email");

        let row = sqlx::query(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals WHERE lower(email) = lower($1)"
        ))
        .bind(email.trim())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_principal_by_email", e))?;

        row.map(|r| decode::<PrincipalRow>(&r).map(Principal::from))
            .transpose()
    }

    #[instrument(skip(self), fields(operation, principal_count), err)]
    async fn list_principals(&self) -> Result<Vec<Principal>, StoreError> {
        let span = Span::current();
        span.record("operation", "list_principals");

        let rows = sqlx::query(&format!(
            "SELECT {PRINCIPAL_COLUMNS} FROM principals ORDER BY lower(user_name) ASC, id ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_principals", e))?;

        let principals = decode_all::<PrincipalRow, Principal>(&rows)?;
        span.record("principal_count", principals.len());
        Ok(principals)
    }

    #[instrument(skip(self, principal), fields(principal_id = %principal.id, operation), err)]
    async fn update_principal(&self, principal: &Principal) -> Result<(), StoreError> {
        Span::current().record("operation", "update_principal");

        let result = sqlx::query(
            r#"
            UPDATE principals
            SET user_name = $2,
                email = $3,
                is_active = $4,
                is_blocked = $5,
                blocked_at = $6,
                updated_at = $7,
                last_login_at = $8
            WHERE id = $1
            "#,
        )
        .bind(principal.id.as_uuid())
        .bind(&principal.user_name)
        .bind(&principal.email)
        .bind(principal.is_active)
        .bind(principal.is_blocked)
        .bind(principal.blocked_at)
        .bind(principal.updated_at)
        .bind(principal.last_login_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_principal", e))?;

        require_affected(result.rows_affected(), || format!("principal {}", principal.id))
    }

    #[instrument(skip(self), fields(principal_id = %id, operation), err)]
    async fn delete_principal(&self, id: PrincipalId) -> Result<(), StoreError> {
        Span::current().record("operation", "delete_principal");

        let result = sqlx::query("DELETE FROM principals WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_principal", e))?;

        require_affected(result.rows_affected(), || format!("principal {id}"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Profiles
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, profile), fields(principal_id = %principal_id, operation), err)]
    async fn upsert_profile(
        &self,
        principal_id: PrincipalId,
        profile: &Profile,
    ) -> Result<(), StoreError> {
        Span::current().record("operation", "upsert_profile");

        sqlx::query(
            r#"
            INSERT INTO profiles (
                principal_id, first_name, last_name, date_of_birth, profile_picture_url,
                street_address, city, postal_code, country
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (principal_id) DO UPDATE
            SET first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                date_of_birth = EXCLUDED.date_of_birth,
                profile_picture_url = EXCLUDED.profile_picture_url,
                street_address = EXCLUDED.street_address,
                city = EXCLUDED.city,
                postal_code = EXCLUDED.postal_code,
                country = EXCLUDED.country
            "#,
        )
        .bind(principal_id.as_uuid())
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(profile.date_of_birth)
        .bind(&profile.profile_picture_url)
        .bind(&profile.street_address)
        .bind(&profile.city)
        .bind(&profile.postal_code)
        .bind(&profile.country)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_profile", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(principal_id = %principal_id, operation), err)]
    async fn find_profile(&self, principal_id: PrincipalId) -> Result<Option<Profile>, StoreError> {
        Span::current().record("operation", "find_profile");

        let row = sqlx::query(
            r#"
            SELECT first_name, last_name, date_of_birth, profile_picture_url,
                   street_address, city, postal_code, country
            FROM profiles
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_profile", e))?;

        row.map(|r| decode::<ProfileRow>(&r).map(Profile::from))
            .transpose()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, role), fields(role_id = %role.id, operation), err)]
    async fn insert_role(&self, role: &Role) -> Result<(), StoreError> {
        Span::current().record("operation", "insert_role");

        sqlx::query(
            r#"
            INSERT INTO roles (id, name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.created_at)
        .bind(role.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(role_id = %id, operation), err)]
    async fn find_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        Span::current().record("operation", "find_role");

        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role", e))?;

        row.map(|r| decode::<RoleRow>(&r).map(Role::from)).transpose()
    }

    #[instrument(skip(self), fields(operation), err)]
    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        Span::current().record("operation", "find_role_by_name");

        let row = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles WHERE lower(name) = $1"
        ))
        .bind(Role::normalize_name(name))
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_role_by_name", e))?;

        row.map(|r| decode::<RoleRow>(&r).map(Role::from)).transpose()
    }

    #[instrument(skip(self), fields(operation, role_count), err)]
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let span = Span::current();
        span.record("operation", "list_roles");

        let rows = sqlx::query(&format!(
            "SELECT {ROLE_COLUMNS} FROM roles ORDER BY lower(name) ASC, id ASC"
        ))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_roles", e))?;

        let roles = decode_all::<RoleRow, Role>(&rows)?;
        span.record("role_count", roles.len());
        Ok(roles)
    }

    #[instrument(skip(self, role), fields(role_id = %role.id, operation), err)]
    async fn update_role(&self, role: &Role) -> Result<(), StoreError> {
        Span::current().record("operation", "update_role");

        let result = sqlx::query(
            r#"
            UPDATE roles
            SET name = $2, description = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role", e))?;

        require_affected(result.rows_affected(), || format!("role {}", role.id))
    }

    #[instrument(skip(self), fields(role_id = %id, operation), err)]
    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        Span::current().record("operation", "delete_role");

        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        require_affected(result.rows_affected(), || format!("role {id}"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // User ↔ role links
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(
        skip(self, link),
        fields(principal_id = %link.principal_id, role_id = %link.role_id, operation),
        err
    )]
    async fn attach_user_role(&self, link: &UserRole) -> Result<bool, StoreError> {
        Span::current().record("operation", "attach_user_role");

        let result = sqlx::query(
            r#"
            INSERT INTO user_roles (principal_id, role_id, assigned_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (principal_id, role_id) DO NOTHING
            "#,
        )
        .bind(link.principal_id.as_uuid())
        .bind(link.role_id.as_uuid())
        .bind(link.assigned_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("attach_user_role", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(principal_id = %principal_id, role_id = %role_id, operation), err)]
    async fn detach_user_role(
        &self,
        principal_id: PrincipalId,
        role_id: RoleId,
    ) -> Result<bool, StoreError> {
        Span::current().record("operation", "detach_user_role");

        let result = sqlx::query("DELETE FROM user_roles WHERE principal_id = $1 AND role_id = $2")
            .bind(principal_id.as_uuid())
            .bind(role_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("detach_user_role", e))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), fields(principal_id = %principal_id, operation), err)]
    async fn list_user_roles_by_principal(
        &self,
        principal_id: PrincipalId,
    ) -> Result<Vec<UserRole>, StoreError> {
        Span::current().record("operation", "list_user_roles_by_principal");

        let rows = sqlx::query(
            r#"
            SELECT principal_id, role_id, assigned_at
            FROM user_roles
            WHERE principal_id = $1
            ORDER BY assigned_at ASC, role_id ASC
            "#,
        )
        .bind(principal_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_user_roles_by_principal", e))?;

        decode_all::<UserRoleRow, UserRole>(&rows)
    }

    #[instrument(skip(self), fields(role_id = %role_id, operation), err)]
    async fn list_user_roles_by_role(&self, role_id: RoleId) -> Result<Vec<UserRole>, StoreError> {
        Span::current().record("operation", "list_user_roles_by_role");

        let rows = sqlx::query(
            r#"
            SELECT principal_id, role_id, assigned_at
            FROM user_roles
            WHERE role_id = $1
            ORDER BY assigned_at ASC, principal_id ASC
            "#,
        )
        .bind(role_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_user_roles_by_role", e))?;

        decode_all::<UserRoleRow, UserRole>(&rows)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role permissions
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(
        skip(self, grant),
        fields(role_id = %grant.role_id, permission = %grant.permission, operation),
        err
    )]
    async fn upsert_role_permission(&self, grant: &RolePermission) -> Result<(), StoreError> {
        Span::current().record("operation", "upsert_role_permission");

        sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission, assigned_at, revoked_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (role_id, permission) DO UPDATE
            SET assigned_at = EXCLUDED.assigned_at,
                revoked_at = EXCLUDED.revoked_at
            "#,
        )
        .bind(grant.role_id.as_uuid())
        .bind(grant.permission.as_str())
        .bind(grant.assigned_at)
        .bind(grant.revoked_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_role_permission", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(role_id = %role_id, operation), err)]
    async fn find_role_permission(
        &self,
        role_id: RoleId,
        permission: &Permission,
    ) -> Result<Option<RolePermission>, StoreError> {
        Span::current().record("operation", "find_role_permission");

        let row = sqlx::query(
            r#"
            SELECT role_id, permission, assigned_at, revoked_at
            FROM role_permissions
            WHERE role_id = $1 AND permission = $2
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(permission.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_role_permission", e))?;

        row.map(|r| decode::<RolePermissionRow>(&r).map(RolePermission::from))
            .transpose()
    }

    #[instrument(skip(self), fields(role_id = %role_id, operation), err)]
    async fn list_role_permissions(
        &self,
        role_id: RoleId,
        include_revoked: bool,
    ) -> Result<Vec<RolePermission>, StoreError> {
        Span::current().record("operation", "list_role_permissions");

        let rows = sqlx::query(
            r#"
            SELECT role_id, permission, assigned_at, revoked_at
            FROM role_permissions
            WHERE role_id = $1 AND ($2 OR revoked_at IS NULL)
            ORDER BY permission ASC
            "#,
        )
        .bind(role_id.as_uuid())
        .bind(include_revoked)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_role_permissions", e))?;

        decode_all::<RolePermissionRow, RolePermission>(&rows)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role claims
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, claim), fields(role_id = %claim.role_id, claim_id = %claim.id, operation), err)]
    async fn insert_role_claim(&self, claim: &RoleClaim) -> Result<(), StoreError> {
        Span::current().record("operation", "insert_role_claim");

        sqlx::query(
            r#"
            INSERT INTO role_claims (id, role_id, claim_type, claim_value, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(claim.id.as_uuid())
        .bind(claim.role_id.as_uuid())
        .bind(&claim.claim_type)
        .bind(&claim.claim_value)
        .bind(claim.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_role_claim", e))?;

        Ok(())
    }

    #[instrument(skip(self, claim), fields(role_id = %claim.role_id, claim_id = %claim.id, operation), err)]
    async fn update_role_claim(&self, claim: &RoleClaim) -> Result<(), StoreError> {
        Span::current().record("operation", "update_role_claim");

        let result = sqlx::query(
            r#"
            UPDATE role_claims
            SET claim_type = $3, claim_value = $4, created_at = $5
            WHERE id = $1 AND role_id = $2
            "#,
        )
        .bind(claim.id.as_uuid())
        .bind(claim.role_id.as_uuid())
        .bind(&claim.claim_type)
        .bind(&claim.claim_value)
        .bind(claim.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_role_claim", e))?;

        require_affected(result.rows_affected(), || {
            format!("claim {} on role {}", claim.id, claim.role_id)
        })
    }

    #[instrument(skip(self), fields(role_id = %role_id, claim_id = %claim_id, operation), err)]
    async fn delete_role_claim(
        &self,
        role_id: RoleId,
        claim_id: ClaimId,
    ) -> Result<(), StoreError> {
        Span::current().record("operation", "delete_role_claim");

        let result = sqlx::query("DELETE FROM role_claims WHERE id = $1 AND role_id = $2")
            .bind(claim_id.as_uuid())
            .bind(role_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_role_claim", e))?;

        require_affected(result.rows_affected(), || {
            format!("claim {claim_id} on role {role_id}")
        })
    }

    #[instrument(skip(self), fields(role_id = %role_id, operation), err)]
    async fn list_role_claims(&self, role_id: RoleId) -> Result<Vec<RoleClaim>, StoreError> {
        Span::current().record("operation", "list_role_claims");

        let rows = sqlx::query(
            r#"
            SELECT id, role_id, claim_type, claim_value, created_at
            FROM role_claims
            WHERE role_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(role_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_role_claims", e))?;

        decode_all::<RoleClaimRow, RoleClaim>(&rows)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Audit trail
    // ─────────────────────────────────────────────────────────────────────────

    #[instrument(skip(self, log), fields(audit_id = %log.id, action = %log.action, operation), err)]
    async fn append_audit_log(&self, log: &AuditLog) -> Result<(), StoreError> {
        Span::current().record("operation", "append_audit_log");

        sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, action, description, entity_name, entity_id, changed_by, timestamp, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(log.id.as_uuid())
        .bind(log.action.as_str())
        .bind(&log.description)
        .bind(&log.entity_name)
        .bind(&log.entity_id)
        .bind(log.changed_by.map(Uuid::from))
        .bind(log.timestamp)
        .bind(log.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("append_audit_log", e))?;

        Ok(())
    }

    #[instrument(skip(self), fields(operation, audit_count), err)]
    async fn list_audit_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLog>, StoreError> {
        let span = Span::current();
        span.record("operation", "list_audit_logs");

        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX));

        let rows = sqlx::query(&format!(
            r#"
            SELECT {AUDIT_COLUMNS}
            FROM audit_logs
            WHERE ($1::TEXT IS NULL OR entity_name = $1)
              AND ($2::TEXT IS NULL OR entity_id = $2)
              AND ($3::TEXT IS NULL OR action = $3)
              AND ($4::UUID IS NULL OR changed_by = $4)
              AND ($5::TIMESTAMPTZ IS NULL OR timestamp >= $5)
            ORDER BY timestamp ASC, id ASC
            LIMIT $6
            "#
        ))
        .bind(&filter.entity_name)
        .bind(&filter.entity_id)
        .bind(filter.action.map(|a| a.as_str()))
        .bind(filter.changed_by.map(Uuid::from))
        .bind(filter.since)
        .bind(limit)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_audit_logs", e))?;

        let mut logs: Vec<AuditLog> = Vec::with_capacity(rows.len());
        for row in &rows {
            logs.push(AuditLog::try_from(decode::<AuditLogRow>(row)?)?);
        }
        span.record("audit_count", logs.len());
        Ok(logs)
    }

    #[instrument(skip(self), fields(audit_id = %id, operation), err)]
    async fn mark_audit_log_modified(
        &self,
        id: AuditLogId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        Span::current().record("operation", "mark_audit_log_modified");

        let result = sqlx::query("UPDATE audit_logs SET updated_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_audit_log_modified", e))?;

        require_affected(result.rows_affected(), || format!("audit log {id}"))
    }
}

fn require_affected(rows: u64, what: impl FnOnce() -> String) -> Result<(), StoreError> {
    if rows == 0 {
        Err(StoreError::NotFound(what()))
    } else {
        Ok(())
    }
}

/// Map SQLx errors to `StoreError`.
pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());

            match db_err.code().as_deref() {
                // Unique violation
                Some("23505") => StoreError::Conflict(msg),
                // Foreign key violation: the referenced parent row is missing
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

fn decode<'r, R: FromRow<'r, PgRow>>(row: &'r PgRow) -> Result<R, StoreError> {
    R::from_row(row).map_err(|e| StoreError::Backend(format!("failed to decode row: {e}")))
}

fn decode_all<'r, R, T>(rows: &'r [PgRow]) -> Result<Vec<T>, StoreError>
where
    R: FromRow<'r, PgRow>,
    T: From<R>,
{
    rows.iter().map(|r| decode::<R>(r).map(T::from)).collect()
}

#[derive(Debug)]
struct PrincipalRow {
    id: Uuid,
    user_name: String,
    email: String,
    is_active: bool,
    is_blocked: bool,
    blocked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for PrincipalRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PrincipalRow {
            id: row.try_get("id")?,
            user_name: row.try_get("user_name")?,
            email: row.try_get("email")?,
            is_active: row.try_get("is_active")?,
            is_blocked: row.try_get("is_blocked")?,
            blocked_at: row.try_get("blocked_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_login_at: row.try_get("last_login_at")?,
        })
    }
}

impl From<PrincipalRow> for Principal {
    fn from(row: PrincipalRow) -> Self {
        Principal {
            id: PrincipalId::from_uuid(row.id),
            user_name: row.user_name,
            email: row.email,
            is_active: row.is_active,
            is_blocked: row.is_blocked,
            blocked_at: row.blocked_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login_at: row.last_login_at,
        }
    }
}

#[derive(Debug)]
struct ProfileRow {
    first_name: String,
    last_name: String,
    date_of_birth: NaiveDate,
    profile_picture_url: Option<String>,
    street_address: Option<String>,
    city: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for ProfileRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ProfileRow {
            first_name: row.try_get("first_name")?,
            last_name: row.try_get("last_name")?,
            date_of_birth: row.try_get("date_of_birth")?,
            profile_picture_url: row.try_get("profile_picture_url")?,
            street_address: row.try_get("street_address")?,
            city: row.try_get("city")?,
            postal_code: row.try_get("postal_code")?,
            country: row.try_get("country")?,
        })
    }
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: row.date_of_birth,
            profile_picture_url: row.profile_picture_url,
            street_address: row.street_address,
            city: row.city,
            postal_code: row.postal_code,
            country: row.country,
        }
    }
}

#[derive(Debug)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: RoleId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug)]
struct UserRoleRow {
    principal_id: Uuid,
    role_id: Uuid,
    assigned_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for UserRoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRoleRow {
            principal_id: row.try_get("principal_id")?,
            role_id: row.try_get("role_id")?,
            assigned_at: row.try_get("assigned_at")?,
        })
    }
}

impl From<UserRoleRow> for UserRole {
    fn from(row: UserRoleRow) -> Self {
        UserRole {
            principal_id: PrincipalId::from_uuid(row.principal_id),
            role_id: RoleId::from_uuid(row.role_id),
            assigned_at: row.assigned_at,
        }
    }
}

#[derive(Debug)]
struct RolePermissionRow {
    role_id: Uuid,
    permission: String,
    assigned_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for RolePermissionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RolePermissionRow {
            role_id: row.try_get("role_id")?,
            permission: row.try_get("permission")?,
            assigned_at: row.try_get("assigned_at")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }
}

impl From<RolePermissionRow> for RolePermission {
    fn from(row: RolePermissionRow) -> Self {
        RolePermission {
            role_id: RoleId::from_uuid(row.role_id),
            permission: Permission::from_stored(row.permission),
            assigned_at: row.assigned_at,
            revoked_at: row.revoked_at,
        }
    }
}

#[derive(Debug)]
struct RoleClaimRow {
    id: Uuid,
    role_id: Uuid,
    claim_type: String,
    claim_value: String,
    created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for RoleClaimRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleClaimRow {
            id: row.try_get("id")?,
            role_id: row.try_get("role_id")?,
            claim_type: row.try_get("claim_type")?,
            claim_value: row.try_get("claim_value")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

impl From<RoleClaimRow> for RoleClaim {
    fn from(row: RoleClaimRow) -> Self {
        RoleClaim {
            id: ClaimId::from_uuid(row.id),
            role_id: RoleId::from_uuid(row.role_id),
            claim_type: row.claim_type,
            claim_value: row.claim_value,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug)]
struct AuditLogRow {
    id: Uuid,
    action: String,
    description: String,
    entity_name: String,
    entity_id: String,
    changed_by: Option<Uuid>,
    timestamp: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for AuditLogRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AuditLogRow {
            id: row.try_get("id")?,
            action: row.try_get("action")?,
            description: row.try_get("description")?,
            entity_name: row.try_get("entity_name")?,
            entity_id: row.try_get("entity_id")?,
            changed_by: row.try_get("changed_by")?,
            timestamp: row.try_get("timestamp")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<AuditLogRow> for AuditLog {
    type Error = StoreError;

    fn try_from(row: AuditLogRow) -> Result<Self, Self::Error> {
        let action: AuditAction = row
            .action
            .parse()
            .map_err(|e| StoreError::Backend(format!("failed to decode audit row: {e}")))?;
        Ok(AuditLog {
            id: AuditLogId::from_uuid(row.id),
            action,
            description: row.description,
            entity_name: row.entity_name,
            entity_id: row.entity_id,
            changed_by: row.changed_by.map(PrincipalId::from_uuid),
            timestamp: row.timestamp,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    //! These run against a real database only when `TEST_DATABASE_URL` is set.

    use super::*;
    use crate::config::apply_schema;
    use aeternum_auth::audit::entity_names;
    use aeternum_auth::{Actor, AuditEntry, PermissionCatalog};

    async fn store() -> Option<PostgresIdentityStore> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&url).await.expect("connect to TEST_DATABASE_URL");
        apply_schema(&pool).await.expect("apply schema");
        Some(PostgresIdentityStore::new(pool))
    }

    fn unique(prefix: &str) -> String {
        format!("{prefix}-{}", Uuid::now_v7().simple())
    }

    #[test]
    fn closed_pool_maps_to_backend() {
        let err = map_sqlx_error("insert_role", sqlx::Error::PoolClosed);
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn role_round_trip_and_cascade() {
        let Some(store) = store().await else {
            return;
        };
        let now = Utc::now();
        let name = unique("Editor");
        let role = Role::new(RoleId::new(), &name, Some("edits".into()), now).unwrap();
        store.insert_role(&role).await.unwrap();

        let dup = Role::new(RoleId::new(), &name.to_uppercase(), None, now).unwrap();
        assert!(matches!(
            store.insert_role(&dup).await.unwrap_err(),
            StoreError::Conflict(_)
        ));

        let permission = PermissionCatalog::builtin().resolve("caneditarticle").unwrap();
        store
            .upsert_role_permission(&RolePermission::new(role.id, permission, now))
            .await
            .unwrap();
        let claim = RoleClaim::new(ClaimId::new(), role.id, "dept", "news", now).unwrap();
        store.insert_role_claim(&claim).await.unwrap();

        let user = unique("alice");
        let alice = Principal::new(PrincipalId::new(), &user, &format!("{user}@example.com"), now)
            .unwrap();
        store.insert_principal(&alice).await.unwrap();
        assert!(store.attach_user_role(&UserRole::new(alice.id, role.id, now)).await.unwrap());
        assert!(!store.attach_user_role(&UserRole::new(alice.id, role.id, now)).await.unwrap());

        store.delete_role(role.id).await.unwrap();
        assert!(store.list_user_roles_by_principal(alice.id).await.unwrap().is_empty());
        assert!(store.list_role_permissions(role.id, true).await.unwrap().is_empty());
        assert!(store.list_role_claims(role.id).await.unwrap().is_empty());

        let entry = AuditEntry::new(Actor::System, AuditAction::DeleteUser, entity_names::USER, alice.id);
        let log = AuditLog::record(AuditLogId::new(), entry, now).unwrap();
        store.append_audit_log(&log).await.unwrap();
        store.delete_principal(alice.id).await.unwrap();

        let trail = store
            .list_audit_logs(&AuditFilter::for_entity(entity_names::USER, alice.id))
            .await
            .unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::DeleteUser);
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let Some(store) = store().await else {
            return;
        };
        let now = Utc::now();
        let email = format!("{}@example.com", unique("carol"));
        let carol = Principal::new(PrincipalId::new(), &unique("carol"), &email, now).unwrap();
        store.insert_principal(&carol).await.unwrap();

        let mut twin = Principal::new(PrincipalId::new(), &unique("caroline"), &email, now).unwrap();
        twin.email = email.to_uppercase();
        assert!(matches!(
            store.insert_principal(&twin).await.unwrap_err(),
            StoreError::Conflict(_)
        ));
        assert_eq!(
            store.find_principal_by_email(&email.to_uppercase()).await.unwrap().map(|p| p.id),
            Some(carol.id)
        );
    }

    #[tokio::test]
    async fn attaching_to_a_missing_role_is_not_found() {
        let Some(store) = store().await else {
            return;
        };
        let user = unique("bob");
        let bob = Principal::new(PrincipalId::new(), &user, &format!("{user}@example.com"), Utc::now())
            .unwrap();
        store.insert_principal(&bob).await.unwrap();

        let err = store
            .attach_user_role(&UserRole::new(bob.id, RoleId::new(), Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
