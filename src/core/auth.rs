//! Permission checks for dynamic resources
//!
//! Requests carry an [`AuthContext`]. A [`PermissionChecker`] decides whether
//! that context may perform an [`Action`] on a resource, and for single-row
//! and bulk writes, on each individual record.

use crate::core::record::Record;
use async_trait::async_trait;
use axum::http::HeaderMap;
use indexmap::IndexMap;
use serde_json::Value;

/// Header carrying the caller's user id (see [`HeaderAuthProvider`])
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the caller's comma-separated roles
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Authorization context extracted from a request
#[derive(Debug, Clone, PartialEq)]
pub enum AuthContext {
    /// Authenticated user
    User { user_id: String, roles: Vec<String> },

    /// Service-to-service communication
    Service { service_name: String },

    /// System administrator
    Admin { admin_id: String },

    /// No authentication (public access)
    Anonymous,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        matches!(self, AuthContext::Admin { .. })
    }

    pub fn is_service(&self) -> bool {
        matches!(self, AuthContext::Service { .. })
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            AuthContext::User { user_id, .. } => Some(user_id),
            _ => None,
        }
    }
}

/// What a request is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

/// Authorization policy for an operation
#[derive(Debug, Clone)]
pub enum AuthPolicy {
    /// Public access (no auth required)
    Public,

    /// Any authenticated caller
    Authenticated,

    /// The user whose id matches the record's owner field
    Owner,

    /// User must have one of these roles
    HasRole(Vec<String>),

    ServiceOnly,

    AdminOnly,

    /// All of the policies (AND)
    And(Vec<AuthPolicy>),

    /// Any of the policies (OR)
    Or(Vec<AuthPolicy>),

    /// Custom policy function
    Custom(fn(&AuthContext) -> bool),
}

impl AuthPolicy {
    /// Check the policy against a context alone.
    ///
    /// `Owner` cannot be decided without a record and passes here for users;
    /// [`AuthPolicy::check_object`] narrows it per row.
    pub fn check(&self, context: &AuthContext) -> bool {
        match self {
            AuthPolicy::Public => true,
            AuthPolicy::Authenticated => !matches!(context, AuthContext::Anonymous),
            AuthPolicy::Owner => context.user_id().is_some(),
            AuthPolicy::HasRole(required) => match context {
                AuthContext::User { roles, .. } => required.iter().any(|r| roles.contains(r)),
                _ => false,
            },
            AuthPolicy::ServiceOnly => context.is_service(),
            AuthPolicy::AdminOnly => context.is_admin(),
            AuthPolicy::And(policies) => policies.iter().all(|p| p.check(context)),
            AuthPolicy::Or(policies) => policies.iter().any(|p| p.check(context)),
            AuthPolicy::Custom(f) => f(context),
        }
    }

    /// Check the policy for one record, resolving `Owner` against `owner_field`
    pub fn check_object(
        &self,
        context: &AuthContext,
        record: &Record,
        owner_field: Option<&str>,
    ) -> bool {
        match self {
            AuthPolicy::Owner => {
                let (Some(user_id), Some(field)) = (context.user_id(), owner_field) else {
                    return false;
                };
                owner_of(record, field).is_some_and(|owner| owner == user_id)
            }
            AuthPolicy::And(policies) => policies
                .iter()
                .all(|p| p.check_object(context, record, owner_field)),
            AuthPolicy::Or(policies) => policies
                .iter()
                .any(|p| p.check_object(context, record, owner_field)),
            other => other.check(context),
        }
    }

    /// Whether the outcome can differ from row to row
    pub fn is_object_level(&self) -> bool {
        match self {
            AuthPolicy::Owner => true,
            AuthPolicy::And(policies) | AuthPolicy::Or(policies) => {
                policies.iter().any(AuthPolicy::is_object_level)
            }
            _ => false,
        }
    }

    /// Parse a policy from its configuration string
    pub fn parse_policy(s: &str) -> Self {
        match s {
            "public" => AuthPolicy::Public,
            "authenticated" => AuthPolicy::Authenticated,
            "owner" => AuthPolicy::Owner,
            "service_only" => AuthPolicy::ServiceOnly,
            "admin_only" => AuthPolicy::AdminOnly,
            s if s.starts_with("role:") => {
                AuthPolicy::HasRole(vec![s.trim_start_matches("role:").to_string()])
            }
            s if s.starts_with("owner_or_role:") => AuthPolicy::Or(vec![
                AuthPolicy::Owner,
                AuthPolicy::HasRole(vec![s.trim_start_matches("owner_or_role:").to_string()]),
            ]),
            _ => AuthPolicy::Authenticated,
        }
    }
}

fn owner_of(record: &Record, field: &str) -> Option<String> {
    if let Some(value) = record.attr(field) {
        return match value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
    }
    if let Some(relation) = record.relation(field) {
        return relation.keys().first().map(|k| k.id.to_string());
    }
    // users own their own row
    (field == "id").then(|| record.id.as_ref().map(ToString::to_string)).flatten()
}

/// Decides whether a caller may act on a resource and on individual records
pub trait PermissionChecker: Send + Sync {
    fn has_permission(&self, context: &AuthContext, action: Action, resource: &str) -> bool;

    fn has_object_permission(
        &self,
        _context: &AuthContext,
        _action: Action,
        _record: &Record,
    ) -> bool {
        true
    }

    /// Whether [`PermissionChecker::has_object_permission`] may reject rows
    /// for `action`; listings check every row when it does
    fn object_level(&self, _action: Action) -> bool {
        false
    }
}

/// Grants everything
#[derive(Debug, Clone, Default)]
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn has_permission(&self, _: &AuthContext, _: Action, _: &str) -> bool {
        true
    }
}

/// Per-action policies, with an optional owner field for `Owner` checks.
///
/// Actions without a configured policy are public.
#[derive(Debug, Clone, Default)]
pub struct PolicyPermissions {
    policies: IndexMap<Action, AuthPolicy>,
    owner_field: Option<String>,
}

impl PolicyPermissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, action: Action, policy: AuthPolicy) -> Self {
        self.policies.insert(action, policy);
        self
    }

    pub fn with_owner_field(mut self, field: impl Into<String>) -> Self {
        self.owner_field = Some(field.into());
        self
    }

    fn policy(&self, action: Action) -> &AuthPolicy {
        self.policies.get(&action).unwrap_or(&AuthPolicy::Public)
    }
}

impl PermissionChecker for PolicyPermissions {
    fn has_permission(&self, context: &AuthContext, action: Action, resource: &str) -> bool {
        let allowed = self.policy(action).check(context);
        if !allowed {
            tracing::debug!("Denied {} on {} for {:?}", action.as_str(), resource, context);
        }
        allowed
    }

    fn has_object_permission(&self, context: &AuthContext, action: Action, record: &Record) -> bool {
        self.policy(action)
            .check_object(context, record, self.owner_field.as_deref())
    }

    fn object_level(&self, action: Action) -> bool {
        self.policy(action).is_object_level()
    }
}

/// Extracts an [`AuthContext`] from request headers
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn extract_context(&self, headers: &HeaderMap) -> AuthContext;
}

/// Every request is anonymous
pub struct NoAuthProvider;

#[async_trait]
impl AuthProvider for NoAuthProvider {
    async fn extract_context(&self, _headers: &HeaderMap) -> AuthContext {
        AuthContext::Anonymous
    }
}

/// Trusts `x-user-id` / `x-user-roles` headers set by an upstream gateway.
///
/// The role `admin` yields [`AuthContext::Admin`].
pub struct HeaderAuthProvider;

#[async_trait]
impl AuthProvider for HeaderAuthProvider {
    async fn extract_context(&self, headers: &HeaderMap) -> AuthContext {
        let Some(user_id) = headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        else {
            return AuthContext::Anonymous;
        };

        let roles: Vec<String> = headers
            .get(USER_ROLES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        if roles.iter().any(|r| r == "admin") {
            AuthContext::Admin {
                admin_id: user_id.to_string(),
            }
        } else {
            AuthContext::User {
                user_id: user_id.to_string(),
                roles,
            }
        }
    }
}
