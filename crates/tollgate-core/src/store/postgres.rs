//! PostgreSQL stores
//!
//! Provides user, role, login history and token blocklist storage using SQLx.
//! Uniqueness of login, email and role name is enforced by the schema; unique
//! violations surface as `DuplicateIdentity`.

use super::{AuthHistoryRepository, RoleRepository, TokenBlocklist, UserRepository};
use crate::config::DatabaseConfig;
use crate::models::{AuthRecord, ProfileUpdate, Role, User};
use crate::{Result, RoleId, TokenId, TollgateError, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        login TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        first_name TEXT,
        last_name TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles_users (
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        role_id UUID NOT NULL REFERENCES roles(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, role_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS authentication (
        seq BIGSERIAL PRIMARY KEY,
        id UUID NOT NULL UNIQUE,
        user_id UUID NOT NULL REFERENCES users(id),
        user_agent TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS authentication_user_idx ON authentication (user_id, created_at)",
    r#"
    CREATE TABLE IF NOT EXISTS token_blocklist (
        jti UUID PRIMARY KEY,
        expires_at TIMESTAMPTZ NOT NULL,
        revoked_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

/// PostgreSQL-backed implementation of every storage trait
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new store connection
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres_pool_size)
            .connect(&config.postgres_url)
            .await
            .map_err(|e| TollgateError::Storage(format!("PostgreSQL connection failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Create from an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        tracing::info!("database schema is up to date");
        Ok(())
    }

    async fn load_roles(&self, user_id: Uuid) -> Result<Vec<Uuid>> {
        let roles = sqlx::query_scalar::<_, Uuid>(
            "SELECT role_id FROM roles_users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn hydrate(&self, row: Option<UserRow>) -> Result<Option<User>> {
        match row {
            Some(row) => {
                let roles = self.load_roles(row.id).await?;
                Ok(Some(row.into_user(roles)))
            }
            None => Ok(None),
        }
    }
}

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    login: String,
    email: String,
    password_hash: String,
    first_name: Option<String>,
    last_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_user(self, roles: Vec<Uuid>) -> User {
        User {
            id: UserId::from_uuid(self.id),
            login: self.login,
            email: self.email,
            password_hash: self.password_hash,
            first_name: self.first_name,
            last_name: self.last_name,
            roles: roles.into_iter().map(RoleId::from_uuid).collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: RoleId::from_uuid(row.id),
            name: row.name,
            description: row.description,
        }
    }
}

#[derive(Debug, FromRow)]
struct AuthRecordRow {
    id: Uuid,
    user_id: Uuid,
    user_agent: String,
    created_at: DateTime<Utc>,
}

impl From<AuthRecordRow> for AuthRecord {
    fn from(row: AuthRecordRow) -> Self {
        AuthRecord {
            id: row.id,
            user_id: UserId::from_uuid(row.user_id),
            user_agent: row.user_agent,
            created_at: row.created_at,
        }
    }
}

const USER_COLUMNS: &str =
    "id, login, email, password_hash, first_name, last_name, created_at, updated_at";

fn expiry_after(ttl: Duration) -> Result<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| TollgateError::Internal(format!("blocklist ttl out of range: {e}")))?;
    Utc::now()
        .checked_add_signed(ttl)
        .ok_or_else(|| TollgateError::Internal("blocklist ttl out of range".to_string()))
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO users (id, login, email, password_hash, first_name, last_name, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(user.id.as_uuid())
        .bind(&user.login)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&mut *tx)
        .await?;

        for role_id in &user.roles {
            sqlx::query("INSERT INTO roles_users (user_id, role_id) VALUES ($1, $2)")
                .bind(user.id.as_uuid())
                .bind(role_id.as_uuid())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE login = $1"
        ))
        .bind(login)
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await
    }

    async fn update_user(&self, id: UserId, update: &ProfileUpdate) -> Result<User> {
        // NULL binds keep the stored column
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET login = COALESCE($2, login),
                email = COALESCE($3, email),
                password_hash = COALESCE($4, password_hash),
                first_name = COALESCE($5, first_name),
                last_name = COALESCE($6, last_name),
                updated_at = $7
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(&update.login)
        .bind(&update.email)
        .bind(&update.password_hash)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        self.hydrate(row).await?.ok_or(TollgateError::NotFound("user"))
    }

    async fn add_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO roles_users (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id.as_uuid())
        .bind(role_id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_foreign_key_violation() {
                    return TollgateError::NotFound("user or role");
                }
            }
            TollgateError::from(e)
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM roles_users WHERE user_id = $1 AND role_id = $2")
            .bind(user_id.as_uuid())
            .bind(role_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RoleRepository for PgStore {
    async fn create_role(&self, role: &Role) -> Result<()> {
        sqlx::query("INSERT INTO roles (id, name, description) VALUES ($1, $2, $3)")
            .bind(role.id.as_uuid())
            .bind(&role.name)
            .bind(&role.description)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name, description FROM roles WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Role::from))
    }

    async fn find_roles(&self, ids: &[RoleId]) -> Result<Vec<Role>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = ids.iter().map(RoleId::as_uuid).collect();
        let rows = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name, description FROM roles WHERE id = ANY($1) ORDER BY name",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Role::from).collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let rows =
            sqlx::query_as::<_, RoleRow>("SELECT id, name, description FROM roles ORDER BY name")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Role::from).collect())
    }
}

#[async_trait]
impl AuthHistoryRepository for PgStore {
    async fn record(&self, record: &AuthRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO authentication (id, user_id, user_agent, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(record.id)
        .bind(record.user_id.as_uuid())
        .bind(&record.user_agent)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history(&self, user_id: UserId, limit: Option<usize>) -> Result<Vec<AuthRecord>> {
        // LIMIT NULL means no limit
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query_as::<_, AuthRecordRow>(
            r#"
            SELECT id, user_id, user_agent, created_at FROM (
                SELECT seq, id, user_id, user_agent, created_at
                FROM authentication
                WHERE user_id = $1
                ORDER BY created_at DESC, seq DESC
                LIMIT $2
            ) recent
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(AuthRecord::from).collect())
    }
}

#[async_trait]
impl TokenBlocklist for PgStore {
    async fn revoke(&self, jti: TokenId, ttl: Duration) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO token_blocklist (jti, expires_at) VALUES ($1, $2)
            ON CONFLICT (jti) DO UPDATE
            SET expires_at = GREATEST(token_blocklist.expires_at, EXCLUDED.expires_at)
            "#,
        )
        .bind(jti.as_uuid())
        .bind(expiry_after(ttl)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn revoke_if_absent(&self, jti: TokenId, ttl: Duration) -> Result<bool> {
        // Either inserts, or takes over an entry that has already expired.
        // A live entry matches neither branch and no row is returned.
        let claimed = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO token_blocklist (jti, expires_at) VALUES ($1, $2)
            ON CONFLICT (jti) DO UPDATE
            SET expires_at = EXCLUDED.expires_at, revoked_at = NOW()
            WHERE token_blocklist.expires_at <= NOW()
            RETURNING jti
            "#,
        )
        .bind(jti.as_uuid())
        .bind(expiry_after(ttl)?)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    async fn is_revoked(&self, jti: TokenId) -> Result<bool> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM token_blocklist WHERE jti = $1 AND expires_at > NOW()",
        )
        .bind(jti.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM token_blocklist WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
