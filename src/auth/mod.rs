//! Authorization: pluggable strategies, compiled per-route plans, and the
//! fan-out check the dispatcher runs as its first stage.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Result, TrellisError};
use crate::pipeline::Inbound;

/// The user a strategy resolved from a request.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: String,
    pub username: String,
    pub roles: Vec<String>,
    #[serde(default)]
    pub claims: Value,
}

impl CurrentUser {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            roles: Vec::new(),
            claims: Value::Null,
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

/// A pluggable auth mechanism (JWT, session, ...). The core only
/// orchestrates calling these and combining results.
#[async_trait]
pub trait AuthStrategy: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Resolve the current user from the request, or `None` if this
    /// strategy does not recognize it.
    async fn resolve_user(&self, request: &Inbound) -> Option<CurrentUser>;

    /// Whether this strategy recognizes the request at all. The
    /// not-logged-in check asks this; override it when recognition is
    /// cheaper than full user resolution.
    async fn is_logged_in(&self, request: &Inbound) -> bool {
        self.resolve_user(request).await.is_some()
    }

    /// Whether this strategy grants any of `roles` for the request. The
    /// role check asks this; override it when role membership lives
    /// outside the resolved user record.
    async fn has_role(&self, request: &Inbound, roles: &[String]) -> bool {
        match self.resolve_user(request).await {
            Some(user) => user.roles.iter().any(|role| roles.contains(role)),
            None => false,
        }
    }
}

/// Strategy scope of one applied rule. `None` means all registered
/// strategies apply.
#[derive(Clone, Debug, Default)]
pub struct RuleScope {
    pub strategies: Option<Vec<String>>,
}

/// An applied has-role rule with its own independent strategy scope.
#[derive(Clone, Debug)]
pub struct RoleRule {
    pub roles: Vec<String>,
    pub strategies: Option<Vec<String>>,
}

/// The authorization requirements of one mount point, compiled from
/// class-level and method-level records with method-level taking
/// precedence (a method-level skip suppresses the class rule).
#[derive(Clone, Debug, Default)]
pub struct AuthPlan {
    pub logged_in: Option<RuleScope>,
    pub not_logged_in: Option<RuleScope>,
    pub has_role: Option<RoleRule>,
}

impl AuthPlan {
    pub fn is_empty(&self) -> bool {
        self.logged_in.is_none() && self.not_logged_in.is_none() && self.has_role.is_none()
    }
}

/// Concurrently ask every applicable strategy for the current user and
/// take the first success. Losing tasks are not cancelled; they run to
/// completion in the background and their results are discarded. All
/// strategies failing (rejecting or erroring) is a plain `None`.
pub async fn resolve_any_user(
    strategies: &[Arc<dyn AuthStrategy>],
    scope: Option<&[String]>,
    request: &Arc<Inbound>,
) -> Option<CurrentUser> {
    let applicable: Vec<_> = in_scope(strategies, scope).cloned().collect();

    if applicable.is_empty() {
        return None;
    }

    let (tx, mut rx) = mpsc::channel(applicable.len());
    for strategy in applicable {
        let tx = tx.clone();
        let request = Arc::clone(request);
        tokio::spawn(async move {
            if let Some(user) = strategy.resolve_user(&request).await {
                // Send fails once a winner has been taken; that is the
                // discard path for the losers.
                let _ = tx.send(user).await;
            }
        });
    }
    drop(tx);

    rx.recv().await
}

fn in_scope<'a>(
    strategies: &'a [Arc<dyn AuthStrategy>],
    scope: Option<&'a [String]>,
) -> impl Iterator<Item = &'a Arc<dyn AuthStrategy>> {
    strategies.iter().filter(move |s| match scope {
        Some(names) => names.iter().any(|n| n == s.name()),
        None => true,
    })
}

/// Strategies allowed to vouch for the caller: the union of the scopes
/// of every rule that needs a resolved user. One rule scoped to all
/// strategies widens the union to all.
fn user_scope(plan: &AuthPlan) -> Option<Vec<String>> {
    let mut names = Vec::new();
    let scopes = plan
        .logged_in
        .as_ref()
        .map(|rule| &rule.strategies)
        .into_iter()
        .chain(plan.has_role.as_ref().map(|rule| &rule.strategies));
    for scope in scopes {
        match scope {
            None => return None,
            Some(list) => names.extend(list.iter().cloned()),
        }
    }
    Some(names)
}

/// Run the ordered authorization checks of a mount point. Returns the
/// resolved user, if any rule required one, for later current-user
/// parameter binding.
pub async fn authorize(
    plan: &AuthPlan,
    strategies: &[Arc<dyn AuthStrategy>],
    request: &Arc<Inbound>,
) -> Result<Option<CurrentUser>> {
    let mut user = None;

    if plan.logged_in.is_some() || plan.has_role.is_some() {
        let scope = user_scope(plan);
        user = resolve_any_user(strategies, scope.as_deref(), request).await;
        if user.is_none() {
            return Err(TrellisError::unauthorized("Authentication required."));
        }
    }

    if let Some(rule) = &plan.not_logged_in {
        for strategy in in_scope(strategies, rule.strategies.as_deref()) {
            if strategy.is_logged_in(request).await {
                return Err(TrellisError::unauthorized("Must not be authenticated."));
            }
        }
    }

    if let Some(rule) = &plan.has_role {
        let mut granted = false;
        for strategy in in_scope(strategies, rule.strategies.as_deref()) {
            if strategy.has_role(request, &rule.roles).await {
                granted = true;
                break;
            }
        }
        if !granted {
            return Err(TrellisError::unauthorized("Missing required role."));
        }
    }

    Ok(user)
}
