//! Storage traits for accounts, roles, login history and token revocation
//!
//! Two backends are provided:
//! - [`memory`]: process-local stores for tests and single-instance use
//! - [`postgres`]: SQLx/PostgreSQL stores with uniqueness enforced by the schema

pub mod memory;
pub mod postgres;

pub use memory::{MemoryBlocklist, MemoryStore};
pub use postgres::PgStore;

use crate::models::{AuthRecord, ProfileUpdate, Role, User};
use crate::{Result, RoleId, TokenId, UserId};
use async_trait::async_trait;
use std::time::Duration;

/// User persistence
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user together with its initial roles.
    /// Fails with `DuplicateIdentity` if the login or email is taken.
    async fn create_user(&self, user: &User) -> Result<()>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;

    async fn find_by_login(&self, login: &str) -> Result<Option<User>>;

    /// Apply the present fields of `update` to the stored user in one atomic
    /// step and return the result. Fields not in the update, and roles, keep
    /// their current stored values. Fails with `DuplicateIdentity` on a
    /// login/email collision and `NotFound` if the user does not exist.
    async fn update_user(&self, id: UserId, update: &ProfileUpdate) -> Result<User>;

    /// Assign a role. Returns `false` if the user already held it.
    async fn add_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool>;

    /// Remove a role. Returns `false` if the user did not hold it.
    async fn remove_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool>;
}

/// Role persistence
#[async_trait]
pub trait RoleRepository: Send + Sync {
    /// Fails with `DuplicateIdentity` if the name is taken
    async fn create_role(&self, role: &Role) -> Result<()>;

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>>;

    /// Resolve several ids at once; unknown ids are skipped
    async fn find_roles(&self, ids: &[RoleId]) -> Result<Vec<Role>>;

    async fn list_roles(&self) -> Result<Vec<Role>>;
}

/// Append-only login history
#[async_trait]
pub trait AuthHistoryRepository: Send + Sync {
    async fn record(&self, record: &AuthRecord) -> Result<()>;

    /// Records for a user, oldest first. With a limit, the most recent
    /// `limit` records are returned, still oldest first.
    async fn history(&self, user_id: UserId, limit: Option<usize>) -> Result<Vec<AuthRecord>>;
}

/// Revocation store keyed by token id
///
/// Entries live for the remaining lifetime of the token they revoke, after
/// which the token would be rejected as expired anyway.
#[async_trait]
pub trait TokenBlocklist: Send + Sync {
    /// Mark a token as revoked for `ttl`. Idempotent; a second call never
    /// shortens an existing entry.
    async fn revoke(&self, jti: TokenId, ttl: Duration) -> Result<()>;

    /// Revoke only if no live entry exists. Returns `true` for the caller
    /// that performed the revocation, `false` for everyone else.
    async fn revoke_if_absent(&self, jti: TokenId, ttl: Duration) -> Result<bool>;

    async fn is_revoked(&self, jti: TokenId) -> Result<bool>;

    /// Drop expired entries, returning how many were removed
    async fn purge_expired(&self) -> Result<u64>;
}
