//! Account lifecycle tests against the in-memory stores
//!
//! PostgreSQL-backed coverage lives in `tollgate-core` and is ignored by
//! default. Run it with: cargo test -- --ignored

use chrono::{Duration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use tollgate_auth::{AuthService, Requirement, TokenType};
use tollgate_core::{
    AuthConfig, NewUser, PasswordConfig, RoleId, TokenRejection, TollgateError, UserId, UserPatch,
};

fn test_config() -> AuthConfig {
    AuthConfig {
        password: PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            enforce_strength: false,
        },
        ..AuthConfig::default()
    }
}

fn service() -> AuthService {
    AuthService::in_memory(&test_config()).expect("service should build")
}

async fn signup(service: &AuthService, login: &str, password: &str, email: &str) -> UserId {
    service
        .signup(NewUser::new(login, password, email))
        .await
        .expect("signup should succeed")
        .id
}

fn rejection<T: std::fmt::Debug>(result: Result<T, TollgateError>) -> TokenRejection {
    match result {
        Err(TollgateError::Rejected(reason)) => reason,
        other => panic!("expected token rejection, got {other:?}"),
    }
}

// =============================================================================
// Signup
// =============================================================================

#[tokio::test]
async fn test_duplicate_signup() {
    let service = service();
    signup(&service, "alice", "pw1", "a@x.com").await;

    let err = service
        .signup(NewUser::new("alice", "pw2", "b@x.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::DuplicateIdentity));

    let err = service
        .signup(NewUser::new("carol", "pw3", "a@x.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::DuplicateIdentity));

    // The original account is untouched
    assert!(service.login("alice", "pw1", "test").await.is_ok());
    assert!(matches!(
        service.login("alice", "pw2", "test").await,
        Err(TollgateError::InvalidCredentials)
    ));
}

#[tokio::test]
async fn test_signup_validation() {
    let service = service();

    for request in [
        NewUser::new("", "pw1", "a@x.com"),
        NewUser::new("alice", "", "a@x.com"),
        NewUser::new("alice", "pw1", "not-an-email"),
        NewUser::new("al ice", "pw1", "a@x.com"),
    ] {
        let err = service.signup(request).await.unwrap_err();
        assert!(matches!(err, TollgateError::Validation(_)), "{err:?}");
    }
}

#[tokio::test]
async fn test_public_user_has_no_hash() {
    let service = service();
    let user = service
        .signup(NewUser::new("alice", "pw1", "a@x.com"))
        .await
        .unwrap();

    let json = serde_json::to_value(&user).unwrap();
    assert!(json.get("password_hash").is_none());
    assert!(json.get("password").is_none());
    assert_eq!(json["login"], "alice");
}

// =============================================================================
// Login and tokens
// =============================================================================

#[tokio::test]
async fn test_unknown_login_matches_bad_password() {
    let service = service();
    signup(&service, "alice", "pw1", "a@x.com").await;

    let unknown = service.login("nobody", "pw1", "test").await.unwrap_err();
    let wrong = service.login("alice", "nope", "test").await.unwrap_err();

    assert_eq!(unknown.kind(), "INVALID_CREDENTIALS");
    assert_eq!(unknown.kind(), wrong.kind());
    assert_eq!(unknown.to_string(), wrong.to_string());
}

#[tokio::test]
async fn test_access_token_expires_after_lifetime() {
    let service = service();
    let user_id = signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    let claims = service
        .validate_token(&pair.access_token, TokenType::Access)
        .await
        .unwrap();
    assert_eq!(claims.sub, user_id);
    assert!(claims.fresh);

    let later = Utc::now() + Duration::seconds(3601);
    let result = service
        .validate_token_at(&pair.access_token, TokenType::Access, later)
        .await;
    assert_eq!(rejection(result), TokenRejection::Expired);
}

#[tokio::test]
async fn test_foreign_secret_is_malformed() {
    let ours = service();
    let mut config = test_config();
    config.jwt_secret = "another-secret-that-is-at-least-32-bytes".to_string();
    let theirs = AuthService::in_memory(&config).unwrap();

    let pair = theirs.issue_tokens(UserId::new(), true).unwrap();
    for (token, scope) in [
        (&pair.access_token, TokenType::Access),
        (&pair.refresh_token, TokenType::Refresh),
    ] {
        let result = ours.validate_token(token, scope).await;
        assert_eq!(rejection(result), TokenRejection::Malformed);
    }
}

#[tokio::test]
async fn test_refresh_token_cannot_authenticate() {
    let service = service();
    signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    let result = service.authenticate(&pair.refresh_token).await;
    assert_eq!(rejection(result), TokenRejection::WrongScope);
}

// =============================================================================
// Logout and revocation
// =============================================================================

#[tokio::test]
async fn test_logout_revokes_access_token() {
    let service = service();
    signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    service.logout(&pair.access_token, None).await.unwrap();

    let result = service
        .validate_token(&pair.access_token, TokenType::Access)
        .await;
    assert_eq!(rejection(result), TokenRejection::Revoked);

    // Refresh token was not supplied, so it still works
    assert!(service
        .validate_token(&pair.refresh_token, TokenType::Refresh)
        .await
        .is_ok());

    // A second logout with the same token is itself rejected
    let result = service.logout(&pair.access_token, None).await;
    assert_eq!(rejection(result), TokenRejection::Revoked);
}

#[tokio::test]
async fn test_logout_with_refresh_token() {
    let service = service();
    signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    service
        .logout(&pair.access_token, Some(&pair.refresh_token))
        .await
        .unwrap();

    let result = service.refresh(&pair.refresh_token).await;
    assert_eq!(rejection(result), TokenRejection::Revoked);
}

#[tokio::test]
async fn test_logout_refuses_foreign_refresh_token() {
    let service = service();
    signup(&service, "alice", "pw1", "a@x.com").await;
    signup(&service, "bob", "pw2", "b@x.com").await;
    let alice = service.login("alice", "pw1", "test").await.unwrap();
    let bob = service.login("bob", "pw2", "test").await.unwrap();

    let err = service
        .logout(&alice.access_token, Some(&bob.refresh_token))
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::Forbidden));

    // Nothing was revoked
    assert!(service.authenticate(&alice.access_token).await.is_ok());
    assert!(service
        .validate_token(&bob.refresh_token, TokenType::Refresh)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_revoke_is_idempotent() {
    let service = service();
    let pair = service.issue_tokens(UserId::new(), true).unwrap();
    let claims = service
        .validate_token(&pair.access_token, TokenType::Access)
        .await
        .unwrap();

    service.revoke_token(&claims).await.unwrap();
    service.revoke_token(&claims).await.unwrap();

    let result = service
        .validate_token(&pair.access_token, TokenType::Access)
        .await;
    assert_eq!(rejection(result), TokenRejection::Revoked);
}

#[tokio::test]
async fn test_concurrent_logout_leaves_token_revoked() {
    let service = Arc::new(service());
    signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    let attempts = (0..8).map(|_| {
        let service = service.clone();
        let token = pair.access_token.clone();
        tokio::spawn(async move { service.logout(&token, None).await })
    });

    for joined in join_all(attempts).await {
        match joined.expect("task panicked") {
            Ok(()) | Err(TollgateError::Rejected(TokenRejection::Revoked)) => {}
            other => panic!("unexpected logout outcome: {other:?}"),
        }
    }

    let result = service
        .validate_token(&pair.access_token, TokenType::Access)
        .await;
    assert_eq!(rejection(result), TokenRejection::Revoked);
}

// =============================================================================
// Refresh
// =============================================================================

#[tokio::test]
async fn test_refresh_rotates_pair() {
    let service = service();
    signup(&service, "alice", "pw1", "a@x.com").await;
    let old = service.login("alice", "pw1", "test").await.unwrap();

    let new = service.refresh(&old.refresh_token).await.unwrap();
    assert_ne!(new.access_jti, old.access_jti);
    assert_ne!(new.refresh_jti, old.refresh_jti);

    let old_refresh = service
        .validate_token(&old.refresh_token, TokenType::Refresh)
        .await;
    assert_eq!(rejection(old_refresh), TokenRejection::Revoked);

    let old_access = service
        .validate_token(&old.access_token, TokenType::Access)
        .await;
    assert_eq!(rejection(old_access), TokenRejection::Revoked);

    let claims = service
        .validate_token(&new.access_token, TokenType::Access)
        .await
        .unwrap();
    assert!(!claims.fresh);

    // The rotated refresh token keeps working
    assert!(service.refresh(&new.refresh_token).await.is_ok());
}

#[tokio::test]
async fn test_refresh_requires_refresh_token() {
    let service = service();
    signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    let result = service.refresh(&pair.access_token).await;
    assert_eq!(rejection(result), TokenRejection::WrongScope);
}

#[tokio::test]
async fn test_concurrent_refresh_has_one_winner() {
    let service = Arc::new(service());
    signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    let attempts = (0..8).map(|_| {
        let service = service.clone();
        let token = pair.refresh_token.clone();
        tokio::spawn(async move { service.refresh(&token).await })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.into_iter().filter(|r| r.is_err()) {
        assert_eq!(rejection(result), TokenRejection::Revoked);
    }
}

// =============================================================================
// Account updates
// =============================================================================

#[tokio::test]
async fn test_update_email_collision() {
    let service = service();
    signup(&service, "alice", "pw1", "a@x.com").await;
    let bob_id = signup(&service, "bob", "pw2", "b@x.com").await;
    let bob = service.login("bob", "pw2", "test").await.unwrap();

    let patch = UserPatch {
        email: Some("a@x.com".to_string()),
        ..UserPatch::default()
    };
    let err = service
        .update_user(&bob.access_token, bob_id, patch)
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::DuplicateIdentity));

    assert_eq!(service.get_user(bob_id).await.unwrap().email, "b@x.com");
}

#[tokio::test]
async fn test_update_password_rehashes() {
    let service = service();
    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    let patch = UserPatch {
        password: Some("pw-new".to_string()),
        first_name: Some("Alice".to_string()),
        ..UserPatch::default()
    };
    let updated = service
        .update_user(&pair.access_token, alice_id, patch)
        .await
        .unwrap();
    assert_eq!(updated.first_name.as_deref(), Some("Alice"));

    assert!(matches!(
        service.login("alice", "pw1", "test").await,
        Err(TollgateError::InvalidCredentials)
    ));
    assert!(service.login("alice", "pw-new", "test").await.is_ok());
}

#[tokio::test]
async fn test_concurrent_updates_keep_both_fields() {
    let service = Arc::new(service());
    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    let password = UserPatch {
        password: Some("pw-new".to_string()),
        ..UserPatch::default()
    };
    let profile = UserPatch {
        first_name: Some("Alice".to_string()),
        ..UserPatch::default()
    };
    let updates = [password, profile].map(|patch| {
        let service = service.clone();
        let token = pair.access_token.clone();
        tokio::spawn(async move { service.update_user(&token, alice_id, patch).await })
    });
    for joined in join_all(updates).await {
        joined.expect("task panicked").unwrap();
    }

    let user = service.get_user(alice_id).await.unwrap();
    assert_eq!(user.first_name.as_deref(), Some("Alice"));
    assert!(service.login("alice", "pw-new", "test").await.is_ok());
}

#[tokio::test]
async fn test_update_rejects_empty_and_unknown_fields() {
    let service = service();
    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();

    let err = service
        .update_user(&pair.access_token, alice_id, UserPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::Validation(_)));

    let parsed: Result<UserPatch, _> = serde_json::from_str(r#"{"password_hash": "x"}"#);
    assert!(parsed.is_err());
}

#[tokio::test]
async fn test_update_other_user_follows_policy() {
    let mut config = test_config();
    config
        .policy
        .insert("users.update".to_string(), vec!["admin".to_string()]);
    let service = AuthService::in_memory(&config).unwrap();

    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;
    signup(&service, "bob", "pw2", "b@x.com").await;
    let bob = service.login("bob", "pw2", "test").await.unwrap();

    let patch = UserPatch {
        last_name: Some("Mallory".to_string()),
        ..UserPatch::default()
    };
    let err = service
        .update_user(&bob.access_token, alice_id, patch)
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::Forbidden));
}

// =============================================================================
// Roles
// =============================================================================

#[tokio::test]
async fn test_role_add_and_remove_are_idempotent() {
    let service = service();
    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();
    let editor = service.create_role("editor", None).await.unwrap();

    assert!(service
        .add_role(&pair.access_token, alice_id, editor.id)
        .await
        .unwrap());
    assert!(!service
        .add_role(&pair.access_token, alice_id, editor.id)
        .await
        .unwrap());

    let roles = service.user_roles(&pair.access_token, alice_id).await.unwrap();
    assert_eq!(roles.len(), 1);
    assert_eq!(roles[0].name, "editor");

    assert!(service
        .remove_role(&pair.access_token, alice_id, editor.id)
        .await
        .unwrap());
    assert!(!service
        .remove_role(&pair.access_token, alice_id, editor.id)
        .await
        .unwrap());
    assert!(service
        .user_roles(&pair.access_token, alice_id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_role_changes_need_known_ids() {
    let service = service();
    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;
    let pair = service.login("alice", "pw1", "test").await.unwrap();
    let editor = service.create_role("editor", None).await.unwrap();

    let err = service
        .add_role(&pair.access_token, alice_id, RoleId::new())
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::NotFound("role")));

    let err = service
        .add_role(&pair.access_token, UserId::new(), editor.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::NotFound("user")));

    assert!(matches!(
        "not-a-uuid".parse::<UserId>(),
        Err(TollgateError::InvalidIdentifier)
    ));
    assert!(matches!(
        "42".parse::<RoleId>(),
        Err(TollgateError::InvalidIdentifier)
    ));
}

#[tokio::test]
async fn test_role_management_requires_token() {
    let service = service();
    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;
    let editor = service.create_role("editor", None).await.unwrap();

    let result = service.add_role("garbage", alice_id, editor.id).await;
    assert_eq!(rejection(result), TokenRejection::Malformed);
}

#[tokio::test]
async fn test_superuser_grants_guarded_roles() {
    let mut config = test_config();
    config.superuser_role = Some("admin".to_string());
    config
        .policy
        .insert("roles.manage".to_string(), vec!["support".to_string()]);
    let service = AuthService::in_memory(&config).unwrap();

    let admin_role = service.create_role("admin", None).await.unwrap();
    let editor = service.create_role("editor", None).await.unwrap();

    let mut root = NewUser::new("root", "pw0", "root@x.com");
    root.roles.push(admin_role.id);
    service.signup(root).await.unwrap();
    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;

    let alice = service.login("alice", "pw1", "test").await.unwrap();
    let err = service
        .add_role(&alice.access_token, alice_id, editor.id)
        .await
        .unwrap_err();
    assert!(matches!(err, TollgateError::Forbidden));

    let root = service.login("root", "pw0", "test").await.unwrap();
    assert!(service
        .add_role(&root.access_token, alice_id, editor.id)
        .await
        .unwrap());
    assert!(service
        .authorize(alice_id, Requirement::Role("editor"))
        .await
        .unwrap()
        .is_allowed());
}

#[tokio::test]
async fn test_list_roles_sorted_by_name() {
    let service = service();
    service.create_role("viewer", None).await.unwrap();
    service
        .create_role("admin", Some("Everything".to_string()))
        .await
        .unwrap();

    let names: Vec<_> = service
        .list_roles()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.name)
        .collect();
    assert_eq!(names, vec!["admin", "viewer"]);
}

// =============================================================================
// Session history
// =============================================================================

#[tokio::test]
async fn test_history_after_two_logins() {
    let service = service();
    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;

    service.login("alice", "pw1", "agent-1").await.unwrap();
    let pair = service.login("alice", "pw1", "agent-2").await.unwrap();

    let history = service.get_history(alice_id, None).await.unwrap();
    let agents: Vec<_> = history.iter().map(|r| r.user_agent.as_str()).collect();
    assert_eq!(agents, vec!["agent-1", "agent-2"]);
    assert!(history[0].created_at <= history[1].created_at);

    let latest = service
        .login_history(&pair.access_token, alice_id, Some(1))
        .await
        .unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].user_agent, "agent-2");
}

#[tokio::test]
async fn test_failed_login_is_not_recorded() {
    let service = service();
    let alice_id = signup(&service, "alice", "pw1", "a@x.com").await;

    let _ = service.login("alice", "wrong", "agent-1").await;
    assert!(service.get_history(alice_id, None).await.unwrap().is_empty());
}
