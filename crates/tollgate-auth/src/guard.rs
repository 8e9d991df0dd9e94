//! Role-based access control
//!
//! A requirement is either a role name or a named operation. Operations are
//! mapped to role names by the configured [`AccessPolicy`]; an operation the
//! policy does not mention only requires an authenticated caller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tollgate_core::{AuthConfig, Result, RoleRepository, User};

/// What the caller must satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement<'a> {
    /// Hold the role with this name
    Role(&'a str),
    /// Be allowed to perform this operation under the policy
    Operation(&'a str),
}

impl std::fmt::Display for Requirement<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Requirement::Role(name) => write!(f, "role:{name}"),
            Requirement::Operation(name) => write!(f, "operation:{name}"),
        }
    }
}

/// Guard decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
}

impl Access {
    pub fn is_allowed(self) -> bool {
        self == Access::Allowed
    }
}

/// Operation-to-role table plus an optional superuser role
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    superuser: Option<String>,
    operations: BTreeMap<String, BTreeSet<String>>,
}

impl AccessPolicy {
    pub fn new(superuser: Option<String>) -> Self {
        Self {
            superuser,
            operations: BTreeMap::new(),
        }
    }

    /// Restrict `operation` to holders of any of `roles`
    pub fn with_operation<I, S>(mut self, operation: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations
            .entry(operation.into())
            .or_default()
            .extend(roles.into_iter().map(Into::into));
        self
    }

    /// Decide against an already-resolved set of role names
    pub fn evaluate(&self, role_names: &BTreeSet<String>, requirement: Requirement<'_>) -> Access {
        if let Some(superuser) = &self.superuser {
            if role_names.contains(superuser) {
                return Access::Allowed;
            }
        }

        let allowed = match requirement {
            Requirement::Role(name) => role_names.contains(name),
            Requirement::Operation(operation) => match self.operations.get(operation) {
                Some(required) => !required.is_disjoint(role_names),
                None => true,
            },
        };

        if allowed {
            Access::Allowed
        } else {
            Access::Denied
        }
    }
}

impl From<&AuthConfig> for AccessPolicy {
    fn from(config: &AuthConfig) -> Self {
        config
            .policy
            .iter()
            .fold(AccessPolicy::new(config.superuser_role.clone()), |policy, (op, roles)| {
                policy.with_operation(op.clone(), roles.iter().cloned())
            })
    }
}

/// Resolves a user's roles and applies the policy
#[derive(Clone)]
pub struct RoleGuard {
    policy: AccessPolicy,
    roles: Arc<dyn RoleRepository>,
}

impl RoleGuard {
    pub fn new(policy: AccessPolicy, roles: Arc<dyn RoleRepository>) -> Self {
        Self { policy, roles }
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }

    /// Names of the roles the user currently holds
    pub async fn role_names(&self, user: &User) -> Result<BTreeSet<String>> {
        let ids: Vec<_> = user.roles.iter().copied().collect();
        let roles = self.roles.find_roles(&ids).await?;
        Ok(roles.into_iter().map(|r| r.name).collect())
    }

    pub async fn authorize(&self, user: &User, requirement: Requirement<'_>) -> Result<Access> {
        let names = self.role_names(user).await?;
        let access = self.policy.evaluate(&names, requirement);
        tracing::debug!(user_id = %user.id, %requirement, ?access, "authorization decision");
        Ok(access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::store::MemoryStore;
    use tollgate_core::{Role, UserRepository};

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_role_requirement() {
        let policy = AccessPolicy::default();
        assert_eq!(
            policy.evaluate(&names(&["editor"]), Requirement::Role("editor")),
            Access::Allowed
        );
        assert_eq!(
            policy.evaluate(&names(&["viewer"]), Requirement::Role("editor")),
            Access::Denied
        );
        assert_eq!(
            policy.evaluate(&names(&[]), Requirement::Role("editor")),
            Access::Denied
        );
    }

    #[test]
    fn test_unmapped_operation_needs_only_authentication() {
        let policy = AccessPolicy::default();
        assert!(policy
            .evaluate(&names(&[]), Requirement::Operation("users.history"))
            .is_allowed());
    }

    #[test]
    fn test_mapped_operation() {
        let policy = AccessPolicy::default().with_operation("roles.manage", ["admin", "support"]);

        assert!(policy
            .evaluate(&names(&["support"]), Requirement::Operation("roles.manage"))
            .is_allowed());
        assert!(!policy
            .evaluate(&names(&["viewer"]), Requirement::Operation("roles.manage"))
            .is_allowed());
    }

    #[test]
    fn test_superuser_satisfies_everything() {
        let policy =
            AccessPolicy::new(Some("admin".to_string())).with_operation("roles.manage", ["support"]);
        let admin = names(&["admin"]);

        assert!(policy.evaluate(&admin, Requirement::Role("auditor")).is_allowed());
        assert!(policy
            .evaluate(&admin, Requirement::Operation("roles.manage"))
            .is_allowed());
    }

    #[test]
    fn test_policy_from_config() {
        let mut config = AuthConfig::default();
        config.superuser_role = Some("root".to_string());
        config
            .policy
            .insert("users.update".to_string(), vec!["admin".to_string()]);

        let policy = AccessPolicy::from(&config);
        assert!(!policy
            .evaluate(&names(&["viewer"]), Requirement::Operation("users.update"))
            .is_allowed());
        assert!(policy
            .evaluate(&names(&["root"]), Requirement::Operation("users.update"))
            .is_allowed());
    }

    #[tokio::test]
    async fn test_guard_resolves_role_names() {
        let store = Arc::new(MemoryStore::new());
        let editor = Role::new("editor", None);
        store.create_role(&editor).await.unwrap();

        let mut user = User::new("alice".to_string(), "a@x.com".to_string(), "h".to_string());
        store.create_user(&user).await.unwrap();
        store.add_role(user.id, editor.id).await.unwrap();
        user.roles.insert(editor.id);

        let guard = RoleGuard::new(AccessPolicy::default(), store);
        assert_eq!(
            guard.authorize(&user, Requirement::Role("editor")).await.unwrap(),
            Access::Allowed
        );
        assert_eq!(
            guard.authorize(&user, Requirement::Role("admin")).await.unwrap(),
            Access::Denied
        );
    }
}
