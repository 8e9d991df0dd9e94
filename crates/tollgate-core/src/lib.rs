//! Tollgate Core - Domain models, storage traits, and shared types
//!
//! This crate defines the abstractions the authentication engine is built on:
//! - Strongly-typed identifiers (users, roles, tokens)
//! - Account models (users, roles, authentication records)
//! - Common error types and token rejection kinds
//! - Storage traits with in-memory and PostgreSQL backends
//! - Configuration management

pub mod config;
pub mod models;
pub mod store;

pub use config::{AppConfig, AuthConfig, ConfigError, DatabaseConfig, LoggingConfig, PasswordConfig};
pub use models::{AuthRecord, NewUser, ProfileUpdate, Role, User, UserPatch, UserPublic};
pub use store::{AuthHistoryRepository, RoleRepository, TokenBlocklist, UserRepository};

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Why a presented token was not accepted
///
/// Validation stops at the first failing check, so each rejection names
/// exactly one cause. None of them carry detail about the token's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRejection {
    /// Bad signature, bad structure, or foreign issuer
    #[error("token is malformed")]
    Malformed,

    #[error("token has expired")]
    Expired,

    /// Access token where a refresh token was required, or the reverse
    #[error("token is not valid for this operation")]
    WrongScope,

    #[error("token has been revoked")]
    Revoked,
}

/// Core error types for Tollgate operations
///
/// Every variant except `Storage` and `Internal` is an expected outcome and
/// renders a stable, generic message. Backend detail is kept in the payload
/// for logging and never appears in `Display`.
#[derive(Error, Debug)]
pub enum TollgateError {
    #[error("login or email already exists")]
    DuplicateIdentity,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token rejected: {0}")]
    Rejected(#[from] TokenRejection),

    #[error("access denied")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("invalid identifier format")]
    InvalidIdentifier,

    #[error("validation error: {0}")]
    Validation(String),

    #[error("storage unavailable")]
    Storage(String),

    #[error("internal error")]
    Internal(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl TollgateError {
    /// Stable machine-readable code for the transport layer
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateIdentity => "DUPLICATE_IDENTITY",
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Rejected(TokenRejection::Malformed) => "TOKEN_MALFORMED",
            Self::Rejected(TokenRejection::Expired) => "TOKEN_EXPIRED",
            Self::Rejected(TokenRejection::WrongScope) => "TOKEN_WRONG_SCOPE",
            Self::Rejected(TokenRejection::Revoked) => "TOKEN_REVOKED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidIdentifier => "INVALID_IDENTIFIER",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Storage(_) => "STORAGE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Whether this error is a fault rather than an expected rejection
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Internal(_) | Self::Config(_))
    }
}

impl From<sqlx::Error> for TollgateError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.is_unique_violation() {
                return TollgateError::DuplicateIdentity;
            }
        }
        TollgateError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TollgateError>;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a user account
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

/// Identifier of a role
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(Uuid);

/// Identifier of an issued token (the JWT `jti` claim)
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty) => {
        impl $t {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $t {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl FromStr for $t {
            type Err = TollgateError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| TollgateError::InvalidIdentifier)
            }
        }
    };
}

impl_uuid_newtype!(UserId);
impl_uuid_newtype!(RoleId);
impl_uuid_newtype!(TokenId);
