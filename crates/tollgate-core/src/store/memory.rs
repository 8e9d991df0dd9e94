//! In-memory stores
//!
//! Suitable for tests and single-instance deployments. For multi-instance
//! deployments use the PostgreSQL backend so revocations are shared.

use super::{AuthHistoryRepository, RoleRepository, TokenBlocklist, UserRepository};
use crate::models::{AuthRecord, ProfileUpdate, Role, User};
use crate::{Result, RoleId, TokenId, TollgateError, UserId};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Tables {
    users: HashMap<UserId, User>,
    roles: HashMap<RoleId, Role>,
    /// Login history in insertion order
    history: Vec<AuthRecord>,
}

impl Tables {
    fn identity_taken(&self, user: &User) -> bool {
        self.users.values().any(|other| {
            other.id != user.id && (other.login == user.login || other.email == user.email)
        })
    }
}

/// Users, roles and login history behind a single lock
///
/// The lock is never held across an `.await`, so every operation is atomic
/// with respect to the others.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| TollgateError::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables
            .write()
            .map_err(|_| TollgateError::Storage("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, user: &User) -> Result<()> {
        let mut tables = self.write()?;
        if tables.users.contains_key(&user.id) || tables.identity_taken(user) {
            return Err(TollgateError::DuplicateIdentity);
        }
        tables.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_by_login(&self, login: &str) -> Result<Option<User>> {
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.login == login)
            .cloned())
    }

    async fn update_user(&self, id: UserId, update: &ProfileUpdate) -> Result<User> {
        let mut tables = self.write()?;
        let mut updated = tables
            .users
            .get(&id)
            .cloned()
            .ok_or(TollgateError::NotFound("user"))?;
        update.apply(&mut updated);

        if tables.identity_taken(&updated) {
            return Err(TollgateError::DuplicateIdentity);
        }
        tables.users.insert(id, updated.clone());
        Ok(updated)
    }

    async fn add_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let mut tables = self.write()?;
        if !tables.roles.contains_key(&role_id) {
            return Err(TollgateError::NotFound("role"));
        }
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(TollgateError::NotFound("user"))?;
        Ok(user.roles.insert(role_id))
    }

    async fn remove_role(&self, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let mut tables = self.write()?;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or(TollgateError::NotFound("user"))?;
        Ok(user.roles.remove(&role_id))
    }
}

#[async_trait]
impl RoleRepository for MemoryStore {
    async fn create_role(&self, role: &Role) -> Result<()> {
        let mut tables = self.write()?;
        if tables.roles.values().any(|r| r.name == role.name) || tables.roles.contains_key(&role.id) {
            return Err(TollgateError::DuplicateIdentity);
        }
        tables.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn find_role(&self, id: RoleId) -> Result<Option<Role>> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn find_roles(&self, ids: &[RoleId]) -> Result<Vec<Role>> {
        let tables = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| tables.roles.get(id).cloned())
            .collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let mut roles: Vec<Role> = self.read()?.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }
}

#[async_trait]
impl AuthHistoryRepository for MemoryStore {
    async fn record(&self, record: &AuthRecord) -> Result<()> {
        self.write()?.history.push(record.clone());
        Ok(())
    }

    async fn history(&self, user_id: UserId, limit: Option<usize>) -> Result<Vec<AuthRecord>> {
        let tables = self.read()?;
        let mut records: Vec<AuthRecord> = tables
            .history
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps
        records.sort_by_key(|r| r.created_at);

        if let Some(limit) = limit {
            let skip = records.len().saturating_sub(limit);
            records.drain(..skip);
        }
        Ok(records)
    }
}

/// Token blocklist backed by a concurrent map of expiry instants
#[derive(Default)]
pub struct MemoryBlocklist {
    entries: DashMap<TokenId, Instant>,
}

impl MemoryBlocklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn expiry_after(now: Instant, ttl: Duration) -> Result<Instant> {
    now.checked_add(ttl)
        .ok_or_else(|| TollgateError::Internal(format!("blocklist ttl out of range: {ttl:?}")))
}

#[async_trait]
impl TokenBlocklist for MemoryBlocklist {
    async fn revoke(&self, jti: TokenId, ttl: Duration) -> Result<()> {
        let expires_at = expiry_after(Instant::now(), ttl)?;
        self.entries
            .entry(jti)
            .and_modify(|current| {
                if expires_at > *current {
                    *current = expires_at;
                }
            })
            .or_insert(expires_at);
        Ok(())
    }

    async fn revoke_if_absent(&self, jti: TokenId, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let expires_at = expiry_after(now, ttl)?;
        match self.entries.entry(jti) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    Ok(false)
                } else {
                    entry.insert(expires_at);
                    Ok(true)
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                Ok(true)
            }
        }
    }

    async fn is_revoked(&self, jti: TokenId) -> Result<bool> {
        Ok(self
            .entries
            .get(&jti)
            .map(|expires_at| *expires_at > Instant::now())
            .unwrap_or(false))
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}
