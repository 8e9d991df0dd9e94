//! Account models
//!
//! - User: account credentials, profile, and assigned roles
//! - Role: named permission group, many-to-many with users
//! - AuthRecord: append-only login history entry
//! - NewUser / UserPatch: validated inputs for creation and update

use crate::{RoleId, TollgateError, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::Validate;

/// User account model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,

    /// Login name (unique)
    pub login: String,

    /// Email address (unique)
    pub email: String,

    /// Argon2id PHC string. Never serialized.
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    /// Assigned roles
    #[serde(default)]
    pub roles: BTreeSet<RoleId>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new user with no roles
    pub fn new(login: String, email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            id: UserId::new(),
            login,
            email,
            password_hash,
            first_name: None,
            last_name: None,
            roles: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }

    /// Convert user to public representation (without sensitive fields)
    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            login: self.login.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            roles: self.roles.iter().copied().collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Public user representation (safe to hand to callers)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPublic {
    pub id: UserId,
    pub login: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub roles: Vec<RoleId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Role model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    /// Role name (unique)
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Role {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        Self {
            id: RoleId::new(),
            name: name.into(),
            description,
        }
    }
}

/// Login history entry
///
/// Written once per successful login and never updated or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub id: Uuid,
    pub user_id: UserId,
    /// User agent or other origin description of the client
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

impl AuthRecord {
    pub fn new(user_id: UserId, user_agent: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            user_agent: user_agent.into(),
            created_at: Utc::now(),
        }
    }
}

/// User creation request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct NewUser {
    #[validate(length(min = 1, max = 64, message = "login must be 1-64 characters"))]
    pub login: String,

    #[validate(length(min = 1, max = 1024, message = "password must not be empty"))]
    pub password: String,

    #[validate(email(message = "email address is not valid"))]
    pub email: String,

    #[serde(default)]
    #[validate(length(max = 128))]
    pub first_name: Option<String>,

    #[serde(default)]
    #[validate(length(max = 128))]
    pub last_name: Option<String>,

    /// Roles to assign at creation
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl NewUser {
    pub fn new(login: impl Into<String>, password: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
            email: email.into(),
            first_name: None,
            last_name: None,
            roles: Vec::new(),
        }
    }

    /// Validate all fields, including the login character set
    pub fn check(&self) -> Result<(), TollgateError> {
        self.validate()
            .map_err(|e| TollgateError::Validation(e.to_string()))?;
        check_login(&self.login)
    }
}

/// Allow-listed user update
///
/// Only the fields below can change after signup. Unknown fields are refused
/// at deserialization, and every present field is validated before any of
/// them is applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UserPatch {
    #[serde(default)]
    #[validate(length(min = 1, max = 64, message = "login must be 1-64 characters"))]
    pub login: Option<String>,

    #[serde(default)]
    #[validate(length(min = 1, max = 1024, message = "password must not be empty"))]
    pub password: Option<String>,

    #[serde(default)]
    #[validate(email(message = "email address is not valid"))]
    pub email: Option<String>,

    #[serde(default)]
    #[validate(length(max = 128))]
    pub first_name: Option<String>,

    #[serde(default)]
    #[validate(length(max = 128))]
    pub last_name: Option<String>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.login.is_none()
            && self.password.is_none()
            && self.email.is_none()
            && self.first_name.is_none()
            && self.last_name.is_none()
    }

    pub fn check(&self) -> Result<(), TollgateError> {
        if self.is_empty() {
            return Err(TollgateError::Validation("empty update".to_string()));
        }
        self.validate()
            .map_err(|e| TollgateError::Validation(e.to_string()))?;
        match &self.login {
            Some(login) => check_login(login),
            None => Ok(()),
        }
    }

    /// Names of the fields this patch touches, for audit logging
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.login.is_some() {
            fields.push("login");
        }
        if self.password.is_some() {
            fields.push("password");
        }
        if self.email.is_some() {
            fields.push("email");
        }
        if self.first_name.is_some() {
            fields.push("first_name");
        }
        if self.last_name.is_some() {
            fields.push("last_name");
        }
        fields
    }

    /// Store-level changes, with the new password (if any) already hashed
    pub fn into_update(self, password_hash: Option<String>) -> ProfileUpdate {
        ProfileUpdate {
            login: self.login,
            email: self.email,
            password_hash,
            first_name: self.first_name,
            last_name: self.last_name,
        }
    }
}

/// Column changes for one user
///
/// Stores apply every present field in a single atomic step against the
/// current row, so concurrent updates touching different fields never
/// overwrite each other. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub login: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl ProfileUpdate {
    pub fn apply(&self, user: &mut User) {
        if let Some(login) = &self.login {
            user.login = login.clone();
        }
        if let Some(email) = &self.email {
            user.email = email.clone();
        }
        if let Some(hash) = &self.password_hash {
            user.password_hash = hash.clone();
        }
        if let Some(first_name) = &self.first_name {
            user.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &self.last_name {
            user.last_name = Some(last_name.clone());
        }
        user.updated_at = Utc::now();
    }
}

fn check_login(login: &str) -> Result<(), TollgateError> {
    let allowed = |c: char| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | '@');
    if login.chars().all(allowed) {
        Ok(())
    } else {
        Err(TollgateError::Validation(
            "login may only contain letters, digits, '.', '_', '-' and '@'".to_string(),
        ))
    }
}
