//! Token validation
//!
//! A token is accepted only if, in order: its signature and structure are
//! valid, it has not expired, its type matches the required scope, and its
//! `jti` is not on the blocklist. The first failing check decides the
//! rejection.

use crate::jwt::{Claims, JwtKeys, TokenType};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tollgate_core::{Result, TokenBlocklist, TokenRejection};

#[derive(Clone)]
pub struct TokenValidator {
    keys: Arc<JwtKeys>,
    blocklist: Arc<dyn TokenBlocklist>,
}

impl TokenValidator {
    pub fn new(keys: Arc<JwtKeys>, blocklist: Arc<dyn TokenBlocklist>) -> Self {
        Self { keys, blocklist }
    }

    /// Validate against the current time
    pub async fn validate(&self, token: &str, required: TokenType) -> Result<Claims> {
        self.validate_at(token, required, Utc::now()).await
    }

    /// Validate as if the current time were `now`
    ///
    /// Expected rejections come back as `TollgateError::Rejected`; only a
    /// blocklist storage failure is reported as anything else.
    pub async fn validate_at(
        &self,
        token: &str,
        required: TokenType,
        now: DateTime<Utc>,
    ) -> Result<Claims> {
        let claims = self.keys.decode_claims(token, required, now)?;

        if self.blocklist.is_revoked(claims.jti).await? {
            return Err(TokenRejection::Revoked.into());
        }

        Ok(claims)
    }

    /// For operations that demand a token straight from a password login
    pub fn require_fresh(claims: &Claims) -> Result<()> {
        if claims.fresh {
            Ok(())
        } else {
            Err(TokenRejection::WrongScope.into())
        }
    }
}
