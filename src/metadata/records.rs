//! Typed record payloads stored in the [`MetadataRegistry`](super::MetadataRegistry).

use std::borrow::Cow;
use std::collections::BTreeMap;

use axum::http::Method;

use crate::metadata::ClassKey;
use crate::pipeline::handler::HandlerFn;
use crate::validate::ParamSpec;

/// One (httpMethod, relativePath, methodName) entry of a controller's
/// route list, together with the erased handler adapter and the handler's
/// declared parameter count.
#[derive(Clone)]
pub struct RouteRecord {
    pub method: Method,
    pub path: String,
    pub handler_name: Cow<'static, str>,
    pub handler: HandlerFn,
    pub arity: usize,
}

impl std::fmt::Debug for RouteRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteRecord")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler_name", &self.handler_name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Binds one positional handler parameter to a named value from a request
/// source (path segment, query entry, or header).
#[derive(Clone, Debug)]
pub struct NamedBinding {
    pub index: usize,
    pub name: String,
    pub spec: ParamSpec,
}

/// Binds one positional handler parameter to the parsed request body.
#[derive(Clone, Debug)]
pub struct BodyBinding {
    pub index: usize,
    pub spec: ParamSpec,
}

/// Binds one positional handler parameter to the resolved current user.
#[derive(Clone, Copy, Debug)]
pub struct CurrentUserBinding {
    pub index: usize,
    pub required: bool,
}

/// An authorization rule declaration at one level (class or method).
///
/// A subject can carry both the rule and its skip variant; the route
/// compiler rejects that combination eagerly as a configuration error.
#[derive(Clone, Debug, Default)]
pub struct AuthRuleRecord {
    pub applied: Option<AppliedRule>,
    pub skip: bool,
}

impl AuthRuleRecord {
    pub fn applied_default() -> Self {
        Self {
            applied: Some(AppliedRule::default()),
            skip: false,
        }
    }
}

/// The payload of an applied rule. `strategies: None` means "all
/// registered strategies"; each rule's scope defaults independently.
#[derive(Clone, Debug, Default)]
pub struct AppliedRule {
    pub strategies: Option<Vec<String>>,
    /// Allowed roles; only meaningful for has-role rules.
    pub roles: Vec<String>,
}

/// Property metadata of a validatable model, used for nested body/param
/// validation. Unknown keys are rejected unless `allow_unknown` is set.
#[derive(Clone, Debug, Default)]
pub struct ModelSchema {
    pub properties: BTreeMap<String, ParamSpec>,
    pub allow_unknown: bool,
}

impl ModelSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    pub fn allow_unknown_keys(mut self) -> Self {
        self.allow_unknown = true;
        self
    }
}

/// Declared response shape of a handler. Read-only projection consumers
/// (e.g. document generators) interpret this; the dispatcher does not.
#[derive(Clone, Copy, Debug)]
pub struct ResponseShape {
    pub model: Option<ClassKey>,
    pub status: Option<u16>,
}
