//! Authentication service layer
//!
//! [`AuthService`] owns every collaborator an operation needs: the stores,
//! the blocklist, the signing keys and the credential verifier. Nothing is
//! global; build one service per process and share it behind an `Arc`.

use crate::audit::{audit_log, AuditEvent};
use crate::guard::{Access, AccessPolicy, Requirement, RoleGuard};
use crate::jwt::{Claims, JwtConfig, JwtKeys, TokenIssuer, TokenPair, TokenType};
use crate::password::{validate_password_strength, CredentialVerifier, PasswordError};
use crate::validator::TokenValidator;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tollgate_core::store::{MemoryBlocklist, MemoryStore, PgStore};
use tollgate_core::{
    AuthConfig, AuthHistoryRepository, AuthRecord, NewUser, Result, Role, RoleId,
    RoleRepository, TokenBlocklist, TokenRejection, TollgateError, User, UserId, UserPatch,
    UserPublic, UserRepository,
};
use tracing::{debug, error};

/// Operation names understood by the access policy
pub mod operations {
    /// Grant or revoke roles on another user
    pub const MANAGE_ROLES: &str = "roles.manage";
    /// List another user's roles
    pub const VIEW_ROLES: &str = "roles.view";
    /// Update another user's account
    pub const UPDATE_USER: &str = "users.update";
    /// Read another user's login history
    pub const VIEW_HISTORY: &str = "users.history";
}

/// Storage backends for a service
pub struct Stores {
    pub users: Arc<dyn UserRepository>,
    pub roles: Arc<dyn RoleRepository>,
    pub history: Arc<dyn AuthHistoryRepository>,
    pub blocklist: Arc<dyn TokenBlocklist>,
}

impl Stores {
    /// Everything in process memory
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            users: store.clone(),
            roles: store.clone(),
            history: store,
            blocklist: Arc::new(MemoryBlocklist::new()),
        }
    }

    /// Everything in PostgreSQL
    pub fn postgres(store: PgStore) -> Self {
        let store = Arc::new(store);
        Self {
            users: store.clone(),
            roles: store.clone(),
            history: store.clone(),
            blocklist: store,
        }
    }
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepository>,
    roles: Arc<dyn RoleRepository>,
    history: Arc<dyn AuthHistoryRepository>,
    blocklist: Arc<dyn TokenBlocklist>,
    verifier: Arc<CredentialVerifier>,
    keys: Arc<JwtKeys>,
    issuer: TokenIssuer,
    validator: TokenValidator,
    guard: RoleGuard,
    enforce_strength: bool,
}

impl AuthService {
    /// Create a new authentication service
    ///
    /// Fails if the configuration is invalid or the hashing parameters are
    /// rejected by Argon2.
    pub fn new(config: &AuthConfig, stores: Stores) -> Result<Self> {
        config.validate()?;
        if config.uses_development_secret() {
            tracing::warn!("JWT secret is the built-in development value, do not use in production");
        }

        let verifier = CredentialVerifier::new(&config.password)
            .map_err(|e| TollgateError::Internal(e.to_string()))?;
        let keys = Arc::new(JwtKeys::new(JwtConfig::from(config)));

        Ok(Self {
            issuer: TokenIssuer::new(keys.clone()),
            validator: TokenValidator::new(keys.clone(), stores.blocklist.clone()),
            guard: RoleGuard::new(AccessPolicy::from(config), stores.roles.clone()),
            users: stores.users,
            roles: stores.roles,
            history: stores.history,
            blocklist: stores.blocklist,
            verifier: Arc::new(verifier),
            keys,
            enforce_strength: config.password.enforce_strength,
        })
    }

    /// Service backed entirely by process memory
    pub fn in_memory(config: &AuthConfig) -> Result<Self> {
        Self::new(config, Stores::in_memory())
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Check a login/password pair
    ///
    /// Unknown logins and wrong passwords both yield `InvalidCredentials`,
    /// after the same amount of hashing work.
    pub async fn verify_credentials(&self, login: &str, password: &str) -> Result<User> {
        let user = self.users.find_by_login(login).await?;

        let verifier = self.verifier.clone();
        let password = password.to_string();
        let stored = user.as_ref().map(|u| u.password_hash.clone());
        let matched = run_blocking(move || verifier.verify_or_dummy(&password, stored.as_deref())).await?;

        match user {
            Some(user) if matched => Ok(user),
            _ => Err(TollgateError::InvalidCredentials),
        }
    }

    async fn hash_password(&self, password: String) -> Result<String> {
        if self.enforce_strength {
            validate_password_strength(&password).map_err(TollgateError::Validation)?;
        }
        let verifier = self.verifier.clone();
        run_blocking(move || verifier.hash(&password)).await
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    pub fn issue_tokens(&self, user_id: UserId, fresh: bool) -> Result<TokenPair> {
        self.issuer
            .issue(user_id, fresh)
            .map_err(|e| TollgateError::Internal(e.to_string()))
    }

    /// Validate a token against the current time
    pub async fn validate_token(&self, token: &str, required: TokenType) -> Result<Claims> {
        self.validate_token_at(token, required, Utc::now()).await
    }

    /// Validate a token as if the current time were `now`
    pub async fn validate_token_at(
        &self,
        token: &str,
        required: TokenType,
        now: DateTime<Utc>,
    ) -> Result<Claims> {
        let result = self.validator.validate_at(token, required, now).await;
        match &result {
            Err(TollgateError::Rejected(reason)) => audit_log(&AuditEvent::InvalidToken {
                reason: reason.to_string(),
            }),
            Err(e) => log_fault("validate_token", e),
            Ok(_) => {}
        }
        result
    }

    /// Blocklist a token for the rest of its lifetime
    ///
    /// Revoking an already revoked or already expired token is a no-op.
    pub async fn revoke_token(&self, claims: &Claims) -> Result<()> {
        let remaining = claims.remaining_secs(Utc::now());
        if remaining == 0 {
            return Ok(());
        }
        self.blocklist
            .revoke(claims.jti, Duration::from_secs(remaining))
            .await
    }

    /// Resolve the user behind an access token
    ///
    /// A valid token whose subject no longer exists is treated as revoked.
    pub async fn authenticate(&self, access_token: &str) -> Result<User> {
        let claims = self.validate_token(access_token, TokenType::Access).await?;
        self.users
            .find_by_id(claims.sub)
            .await?
            .ok_or(TollgateError::Rejected(TokenRejection::Revoked))
    }

    // ------------------------------------------------------------------
    // Account operations
    // ------------------------------------------------------------------

    /// Register a new user
    ///
    /// # Returns
    ///
    /// * `Ok(UserPublic)` - Newly created user
    /// * `Err(TollgateError)` - Invalid fields, unknown role, or duplicate
    ///   login/email
    pub async fn signup(&self, request: NewUser) -> Result<UserPublic> {
        let login = request.login.clone();
        match self.create_account(request).await {
            Ok(user) => {
                audit_log(&AuditEvent::SignupSuccess {
                    user_id: user.id,
                    login: user.login.clone(),
                });
                Ok(user.to_public())
            }
            Err(e) => {
                if e.is_fatal() {
                    log_fault("signup", &e);
                } else {
                    audit_log(&AuditEvent::SignupFailure {
                        login,
                        reason: e.kind().to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    async fn create_account(&self, request: NewUser) -> Result<User> {
        request.check()?;

        let roles: BTreeSet<RoleId> = request.roles.iter().copied().collect();
        self.ensure_roles_exist(&roles).await?;

        let password_hash = self.hash_password(request.password).await?;
        let mut user = User::new(request.login, request.email, password_hash);
        user.first_name = request.first_name;
        user.last_name = request.last_name;
        user.roles = roles;

        self.users.create_user(&user).await?;
        Ok(user)
    }

    async fn ensure_roles_exist(&self, roles: &BTreeSet<RoleId>) -> Result<()> {
        if roles.is_empty() {
            return Ok(());
        }
        let ids: Vec<RoleId> = roles.iter().copied().collect();
        let found = self.roles.find_roles(&ids).await?;
        if found.len() != ids.len() {
            return Err(TollgateError::NotFound("role"));
        }
        Ok(())
    }

    /// Login with login name and password
    ///
    /// The pair is minted before the session is recorded. If recording
    /// fails the pair is dropped and the error returned, so every recorded
    /// login corresponds to an issued pair and vice versa.
    pub async fn login(&self, login: &str, password: &str, user_agent: &str) -> Result<TokenPair> {
        let user = match self.verify_credentials(login, password).await {
            Ok(user) => user,
            Err(e) => {
                if matches!(e, TollgateError::InvalidCredentials) {
                    audit_log(&AuditEvent::LoginFailure {
                        login: login.to_string(),
                        user_agent: user_agent.to_string(),
                    });
                } else {
                    log_fault("login", &e);
                }
                return Err(e);
            }
        };

        let pair = self.issue_tokens(user.id, true)?;
        if let Err(e) = self.record_login(user.id, user_agent).await {
            log_fault("login", &e);
            return Err(e);
        }

        audit_log(&AuditEvent::LoginSuccess {
            user_id: user.id,
            user_agent: user_agent.to_string(),
            access_jti: pair.access_jti,
        });
        Ok(pair)
    }

    /// Exchange a refresh token for a new, non-fresh pair
    ///
    /// The presented refresh token and the access token minted with it are
    /// both revoked. Of several concurrent refreshes of the same token
    /// exactly one wins; the rest see `Revoked`.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.validate_token(refresh_token, TokenType::Refresh).await?;
        let now = Utc::now();

        if self.users.find_by_id(claims.sub).await?.is_none() {
            return Err(TokenRejection::Revoked.into());
        }

        let ttl = Duration::from_secs(claims.remaining_secs(now).max(1));
        if !self.blocklist.revoke_if_absent(claims.jti, ttl).await? {
            audit_log(&AuditEvent::InvalidToken {
                reason: TokenRejection::Revoked.to_string(),
            });
            return Err(TokenRejection::Revoked.into());
        }

        if let Some(access_jti) = claims.pair {
            // The paired access token was issued at the same instant
            let access_exp = claims.iat + self.keys.config().access_expiration_secs;
            let remaining = access_exp.saturating_sub(now.timestamp().max(0) as u64);
            if remaining > 0 {
                self.blocklist
                    .revoke(access_jti, Duration::from_secs(remaining))
                    .await?;
            }
        }

        let pair = self.issue_tokens(claims.sub, false)?;
        audit_log(&AuditEvent::TokenRefresh {
            user_id: claims.sub,
            retired_jti: claims.jti,
            new_access_jti: pair.access_jti,
        });
        Ok(pair)
    }

    /// Revoke the caller's access token and, if supplied, their refresh token
    ///
    /// A refresh token belonging to someone else is refused with `Forbidden`
    /// before anything is revoked. An expired refresh token is ignored.
    /// Without a refresh token only the access token is revoked; the pair's
    /// refresh token stays valid and can still mint new pairs.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> Result<()> {
        let access = self.validate_token(access_token, TokenType::Access).await?;

        let refresh = match refresh_token {
            Some(token) => match self.keys.decode_claims(token, TokenType::Refresh, Utc::now()) {
                Ok(claims) => Some(claims),
                Err(TokenRejection::Expired) => None,
                Err(reason) => return Err(reason.into()),
            },
            None => None,
        };

        if let Some(refresh) = &refresh {
            if refresh.sub != access.sub {
                return Err(TollgateError::Forbidden);
            }
        }

        self.revoke_token(&access).await?;
        if let Some(refresh) = &refresh {
            self.revoke_token(refresh).await?;
        }

        audit_log(&AuditEvent::Logout {
            user_id: access.sub,
            access_jti: access.jti,
            refresh_jti: refresh.map(|c| c.jti),
        });
        Ok(())
    }

    /// Change allow-listed fields of an account
    ///
    /// Acting on one's own account needs only a valid token; acting on
    /// another's requires the `users.update` operation.
    pub async fn update_user(
        &self,
        actor_token: &str,
        user_id: UserId,
        patch: UserPatch,
    ) -> Result<UserPublic> {
        let actor = self.authenticate(actor_token).await?;
        if actor.id != user_id {
            self.require(&actor, Requirement::Operation(operations::UPDATE_USER))
                .await?;
        }

        patch.check()?;
        if self.users.find_by_id(user_id).await?.is_none() {
            return Err(TollgateError::NotFound("user"));
        }

        let fields: Vec<String> = patch.field_names().into_iter().map(String::from).collect();
        let password_hash = match patch.password.clone() {
            Some(password) => Some(self.hash_password(password).await?),
            None => None,
        };
        // Only the patched columns are written, so concurrent updates compose
        let user = self
            .users
            .update_user(user_id, &patch.into_update(password_hash))
            .await?;

        audit_log(&AuditEvent::AccountUpdated {
            user_id,
            actor: actor.id,
            fields,
        });
        Ok(user.to_public())
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<UserPublic> {
        self.users
            .find_by_id(user_id)
            .await?
            .map(|u| u.to_public())
            .ok_or(TollgateError::NotFound("user"))
    }

    // ------------------------------------------------------------------
    // Roles
    // ------------------------------------------------------------------

    pub async fn create_role(&self, name: &str, description: Option<String>) -> Result<Role> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > 64 {
            return Err(TollgateError::Validation(
                "role name must be 1-64 characters".to_string(),
            ));
        }
        let role = Role::new(name, description);
        self.roles.create_role(&role).await?;
        debug!(role_id = %role.id, name = %role.name, "role created");
        Ok(role)
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.roles.list_roles().await
    }

    /// Roles currently held by `user_id`
    pub async fn user_roles(&self, actor_token: &str, user_id: UserId) -> Result<Vec<Role>> {
        let actor = self.authenticate(actor_token).await?;
        let user = if actor.id == user_id {
            actor
        } else {
            self.require(&actor, Requirement::Operation(operations::VIEW_ROLES))
                .await?;
            self.users
                .find_by_id(user_id)
                .await?
                .ok_or(TollgateError::NotFound("user"))?
        };

        let ids: Vec<RoleId> = user.roles.iter().copied().collect();
        self.roles.find_roles(&ids).await
    }

    /// Grant a role. Returns whether the role set changed.
    pub async fn add_role(&self, actor_token: &str, user_id: UserId, role_id: RoleId) -> Result<bool> {
        let actor = self.role_manager(actor_token, user_id, role_id).await?;
        let changed = self.users.add_role(user_id, role_id).await?;
        audit_log(&AuditEvent::RoleGranted {
            user_id,
            role_id,
            actor: actor.id,
            changed,
        });
        Ok(changed)
    }

    /// Revoke a role. Returns whether the role set changed.
    pub async fn remove_role(
        &self,
        actor_token: &str,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<bool> {
        let actor = self.role_manager(actor_token, user_id, role_id).await?;
        let changed = self.users.remove_role(user_id, role_id).await?;
        audit_log(&AuditEvent::RoleRevoked {
            user_id,
            role_id,
            actor: actor.id,
            changed,
        });
        Ok(changed)
    }

    /// Authenticate the actor, check the policy, and confirm both ids exist
    async fn role_manager(&self, actor_token: &str, user_id: UserId, role_id: RoleId) -> Result<User> {
        let actor = self.authenticate(actor_token).await?;
        self.require(&actor, Requirement::Operation(operations::MANAGE_ROLES))
            .await?;

        if self.users.find_by_id(user_id).await?.is_none() {
            return Err(TollgateError::NotFound("user"));
        }
        if self.roles.find_role(role_id).await?.is_none() {
            return Err(TollgateError::NotFound("role"));
        }
        Ok(actor)
    }

    // ------------------------------------------------------------------
    // Authorization
    // ------------------------------------------------------------------

    /// Decide whether `user_id` satisfies `requirement`
    pub async fn authorize(&self, user_id: UserId, requirement: Requirement<'_>) -> Result<Access> {
        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(TollgateError::NotFound("user"))?;
        self.check_access(&user, requirement).await
    }

    async fn check_access(&self, user: &User, requirement: Requirement<'_>) -> Result<Access> {
        let access = self.guard.authorize(user, requirement).await?;
        if !access.is_allowed() {
            audit_log(&AuditEvent::AccessDenied {
                user_id: user.id,
                requirement: requirement.to_string(),
            });
        }
        Ok(access)
    }

    async fn require(&self, user: &User, requirement: Requirement<'_>) -> Result<()> {
        match self.check_access(user, requirement).await? {
            Access::Allowed => Ok(()),
            Access::Denied => Err(TollgateError::Forbidden),
        }
    }

    // ------------------------------------------------------------------
    // Session history
    // ------------------------------------------------------------------

    /// Append a login record
    pub async fn record_login(&self, user_id: UserId, user_agent: &str) -> Result<AuthRecord> {
        let record = AuthRecord::new(user_id, user_agent);
        self.history.record(&record).await?;
        Ok(record)
    }

    /// Login records for `user_id`, oldest first
    pub async fn get_history(&self, user_id: UserId, limit: Option<usize>) -> Result<Vec<AuthRecord>> {
        self.history.history(user_id, limit).await
    }

    /// Login history as seen by the holder of `actor_token`
    pub async fn login_history(
        &self,
        actor_token: &str,
        user_id: UserId,
        limit: Option<usize>,
    ) -> Result<Vec<AuthRecord>> {
        let actor = self.authenticate(actor_token).await?;
        if actor.id != user_id {
            self.require(&actor, Requirement::Operation(operations::VIEW_HISTORY))
                .await?;
        }
        self.get_history(user_id, limit).await
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Drop expired blocklist entries
    pub async fn purge_blocklist(&self) -> Result<u64> {
        let purged = self.blocklist.purge_expired().await?;
        debug!(purged, "blocklist purged");
        Ok(purged)
    }
}

/// Run Argon2 work off the async executor
async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> std::result::Result<T, PasswordError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| TollgateError::Internal(format!("password task failed: {e}")))?
        .map_err(|e| TollgateError::Internal(e.to_string()))
}

fn log_fault(operation: &str, err: &TollgateError) {
    match err {
        TollgateError::Storage(detail) | TollgateError::Internal(detail) => {
            error!(operation, kind = err.kind(), detail = %detail, "operation failed");
        }
        _ => {}
    }
}
