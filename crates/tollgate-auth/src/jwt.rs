//! JWT token issuance and decoding
//!
//! Implements JWT-based credentials with HMAC-SHA256 signing. Every login or
//! refresh mints a pair: a short-lived access token and a longer-lived
//! refresh token. Both carry a unique `jti` used for revocation.

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tollgate_core::{AuthConfig, TokenId, TokenRejection, UserId};

/// Token scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT Claims structure
///
/// Identifiers are typed, so a token whose `sub` or `jti` is not a UUID
/// fails to decode and is rejected as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Token issuer
    pub iss: String,
    /// Subject - user ID
    pub sub: UserId,
    /// JWT ID - unique token identifier for revocation
    pub jti: TokenId,
    /// Issued at timestamp (Unix epoch)
    pub iat: u64,
    /// Expiration timestamp (Unix epoch)
    pub exp: u64,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Issued directly from a password login rather than a refresh
    pub fresh: bool,
    /// On refresh tokens: `jti` of the access token minted alongside
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pair: Option<TokenId>,
}

impl Claims {
    /// Seconds of validity left at `now`, zero once expired
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> u64 {
        self.exp.saturating_sub(unix_secs(now))
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        let exp = i64::try_from(self.exp).unwrap_or(i64::MAX);
        DateTime::from_timestamp(exp, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// JWT generation errors
#[derive(Debug, Error)]
pub enum JwtError {
    #[error("Failed to encode JWT: {0}")]
    EncodingError(#[from] jsonwebtoken::errors::Error),

    #[error("Token lifetime of {0}s overflows the expiry timestamp")]
    LifetimeOverflow(u64),
}

/// Access/refresh token pair returned on login and refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_jti: TokenId,
    pub refresh_jti: TokenId,
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

/// JWT Configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    /// Secret key for HMAC signing
    pub secret: String,
    /// Access token expiration time in seconds (default: 3600 = 1 hour)
    pub access_expiration_secs: u64,
    /// Refresh token expiration time in seconds (default: 30 days)
    pub refresh_expiration_secs: u64,
    /// Token issuer identifier
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

impl From<&AuthConfig> for JwtConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            access_expiration_secs: config.access_expiration_secs,
            refresh_expiration_secs: config.refresh_expiration_secs,
            issuer: config.issuer.clone(),
        }
    }
}

/// Signing and verification keys, derived once from the configured secret
///
/// Shared read-only between the issuer and the validator.
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    config: JwtConfig,
}

impl JwtKeys {
    pub fn new(config: JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        // Expiry is checked against the caller's clock in `decode_claims`
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            config,
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        Ok(encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?)
    }

    /// Verify signature, structure, issuer, expiry and scope
    ///
    /// The checks run in that order and the first failure is returned.
    /// Blocklist membership is checked separately by the validator.
    pub fn decode_claims(
        &self,
        token: &str,
        required: TokenType,
        now: DateTime<Utc>,
    ) -> Result<Claims, TokenRejection> {
        let claims = decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|_| TokenRejection::Malformed)?
            .claims;

        if claims.exp <= unix_secs(now) {
            return Err(TokenRejection::Expired);
        }

        if claims.token_type != required {
            return Err(TokenRejection::WrongScope);
        }

        Ok(claims)
    }
}

/// Mints access/refresh token pairs
#[derive(Clone)]
pub struct TokenIssuer {
    keys: std::sync::Arc<JwtKeys>,
}

impl TokenIssuer {
    pub fn new(keys: std::sync::Arc<JwtKeys>) -> Self {
        Self { keys }
    }

    /// Issue a pair for `user_id` at the current time
    pub fn issue(&self, user_id: UserId, fresh: bool) -> Result<TokenPair, JwtError> {
        self.issue_at(user_id, fresh, Utc::now())
    }

    /// Issue a pair as if the current time were `now`
    pub fn issue_at(
        &self,
        user_id: UserId,
        fresh: bool,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, JwtError> {
        let config = self.keys.config();
        let iat = unix_secs(now);
        let expiry = |lifetime: u64| {
            iat.checked_add(lifetime)
                .filter(|exp| i64::try_from(*exp).is_ok())
                .ok_or(JwtError::LifetimeOverflow(lifetime))
        };

        let access = Claims {
            iss: config.issuer.clone(),
            sub: user_id,
            jti: TokenId::new(),
            iat,
            exp: expiry(config.access_expiration_secs)?,
            token_type: TokenType::Access,
            fresh,
            pair: None,
        };

        let refresh = Claims {
            iss: config.issuer.clone(),
            sub: user_id,
            jti: TokenId::new(),
            iat,
            exp: expiry(config.refresh_expiration_secs)?,
            token_type: TokenType::Refresh,
            fresh: false,
            pair: Some(access.jti),
        };

        Ok(TokenPair {
            access_token: self.keys.sign(&access)?,
            refresh_token: self.keys.sign(&refresh)?,
            access_jti: access.jti,
            refresh_jti: refresh.jti,
            token_type: "Bearer".to_string(),
            expires_in: config.access_expiration_secs,
        })
    }
}

fn unix_secs(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or(0)
}
