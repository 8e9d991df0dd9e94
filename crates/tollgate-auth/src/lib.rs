//! Tollgate authentication
//!
//! Credential verification, JWT issuance and validation, revocation, and
//! role-based access control. [`AuthService`] ties the pieces together over
//! the storage traits from `tollgate-core`.

pub mod audit;
pub mod guard;
pub mod jwt;
pub mod password;
pub mod service;
pub mod validator;

pub use audit::{audit_log, AuditEvent};
pub use guard::{Access, AccessPolicy, Requirement, RoleGuard};
pub use jwt::{Claims, JwtConfig, JwtKeys, TokenIssuer, TokenPair, TokenType};
pub use password::{CredentialVerifier, PasswordError};
pub use service::{operations, AuthService, Stores};
pub use validator::TokenValidator;
