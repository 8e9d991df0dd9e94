//! Security audit logging for authentication events
//!
//! All audit events are logged at INFO level (WARN for rejections) with the
//! "audit" target, making them easy to filter and route to security
//! monitoring systems separately from application logs.
//!
//! Events never include passwords, password hashes, or raw tokens.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tollgate_core::{RoleId, TokenId, UserId};
use tracing::{info, warn};

/// Security audit events for authentication and authorization
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AuditEvent {
    /// New account created
    SignupSuccess { user_id: UserId, login: String },

    /// Account creation refused
    SignupFailure { login: String, reason: String },

    /// Successful password login
    LoginSuccess {
        user_id: UserId,
        user_agent: String,
        access_jti: TokenId,
    },

    /// Failed password login. The same event is logged whether or not the
    /// login exists.
    LoginFailure { login: String, user_agent: String },

    /// Access (and optionally refresh) token revoked by its holder
    Logout {
        user_id: UserId,
        access_jti: TokenId,
        refresh_jti: Option<TokenId>,
    },

    /// Refresh token exchanged for a new pair
    TokenRefresh {
        user_id: UserId,
        retired_jti: TokenId,
        new_access_jti: TokenId,
    },

    /// Token presented but rejected
    InvalidToken { reason: String },

    /// Allow-listed account fields changed
    AccountUpdated {
        user_id: UserId,
        actor: UserId,
        fields: Vec<String>,
    },

    RoleGranted {
        user_id: UserId,
        role_id: RoleId,
        actor: UserId,
        changed: bool,
    },

    RoleRevoked {
        user_id: UserId,
        role_id: RoleId,
        actor: UserId,
        changed: bool,
    },

    /// Guard denied an operation
    AccessDenied { user_id: UserId, requirement: String },
}

impl AuditEvent {
    fn summary(&self) -> &'static str {
        match self {
            AuditEvent::SignupSuccess { .. } => "Signup successful",
            AuditEvent::SignupFailure { .. } => "Signup failed",
            AuditEvent::LoginSuccess { .. } => "Login successful",
            AuditEvent::LoginFailure { .. } => "Login failed",
            AuditEvent::Logout { .. } => "User logout",
            AuditEvent::TokenRefresh { .. } => "Token refresh",
            AuditEvent::InvalidToken { .. } => "Invalid token",
            AuditEvent::AccountUpdated { .. } => "Account updated",
            AuditEvent::RoleGranted { .. } => "Role granted",
            AuditEvent::RoleRevoked { .. } => "Role revoked",
            AuditEvent::AccessDenied { .. } => "Access denied",
        }
    }

    fn is_rejection(&self) -> bool {
        matches!(
            self,
            AuditEvent::SignupFailure { .. }
                | AuditEvent::LoginFailure { .. }
                | AuditEvent::InvalidToken { .. }
                | AuditEvent::AccessDenied { .. }
        )
    }
}

/// Log a security audit event with structured fields
///
/// The event is serialized to JSON for log aggregators. Example output:
///
/// ```json
/// {
///   "event_type": "login_success",
///   "user_id": "550e8400-e29b-41d4-a716-446655440000",
///   "user_agent": "curl/8.4.0",
///   "access_jti": "9b2f4c1e-2b8a-4a57-8d0e-0c4d2f1e6a33"
/// }
/// ```
pub fn audit_log(event: &AuditEvent) {
    let timestamp = Utc::now();
    let event_json = serde_json::to_string(event)
        .unwrap_or_else(|e| format!("{{\"error\":\"Failed to serialize audit event: {e}\"}}"));

    if event.is_rejection() {
        warn!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            "{}",
            event.summary()
        );
    } else {
        info!(
            target: "audit",
            timestamp = %timestamp,
            event = %event_json,
            "{}",
            event.summary()
        );
    }
}
