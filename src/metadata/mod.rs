//! Metadata registry: structural facts keyed by (subject, kind).
//!
//! The registry is pure storage. It performs no validation and no
//! class/method inheritance merging; the route compiler and dispatcher
//! combine class-level and method-level records explicitly where both
//! apply. Writes happen while the application is being built and stop once
//! it is marked initialized; the [`crate::app::ApplicationBuilder`]
//! enforces that, not the registry itself.

pub mod records;

use std::any::TypeId;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use dashmap::DashMap;

use crate::di::Token;
use records::{
    AuthRuleRecord, BodyBinding, CurrentUserBinding, ModelSchema, NamedBinding, ResponseShape,
    RouteRecord,
};

/// Identifies a registered class without holding the type itself.
#[derive(Clone, Copy, Debug)]
pub struct ClassKey {
    type_id: TypeId,
    name: &'static str,
}

impl ClassKey {
    pub fn of<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified type name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, for diagnostics.
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for ClassKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ClassKey {}

impl Hash for ClassKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl std::fmt::Display for ClassKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

/// What a metadata record is attached to: a class, or one of its methods.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Subject {
    Class(ClassKey),
    Method(ClassKey, Cow<'static, str>),
}

impl Subject {
    pub fn class<T: 'static>() -> Self {
        Self::Class(ClassKey::of::<T>())
    }

    pub fn method<T: 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self::Method(ClassKey::of::<T>(), name.into())
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Class(key) => write!(f, "{key}"),
            Self::Method(key, name) => write!(f, "{key}.{name}"),
        }
    }
}

/// The record kinds a subject can carry. At most one record per
/// (subject, kind) pair; `set` overwrites.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum MetadataKind {
    Routes,
    BaseRoute,
    PathParams,
    QueryParams,
    HeaderParams,
    BodyBinding,
    CurrentUserBinding,
    InjectedParamTokens,
    IsLoggedIn,
    IsNotLoggedIn,
    HasRole,
    ResponseShape,
    ModelProperties,
}

/// A stored record. The variant determines the kind it is filed under.
#[derive(Clone)]
pub enum MetadataValue {
    Routes(Vec<RouteRecord>),
    BaseRoute(String),
    PathParams(Vec<NamedBinding>),
    QueryParams(Vec<NamedBinding>),
    HeaderParams(Vec<NamedBinding>),
    BodyBinding(BodyBinding),
    CurrentUserBinding(CurrentUserBinding),
    InjectedParamTokens(BTreeMap<usize, Token>),
    IsLoggedIn(AuthRuleRecord),
    IsNotLoggedIn(AuthRuleRecord),
    HasRole(AuthRuleRecord),
    ResponseShape(ResponseShape),
    ModelProperties(ModelSchema),
}

impl MetadataValue {
    pub fn kind(&self) -> MetadataKind {
        match self {
            Self::Routes(_) => MetadataKind::Routes,
            Self::BaseRoute(_) => MetadataKind::BaseRoute,
            Self::PathParams(_) => MetadataKind::PathParams,
            Self::QueryParams(_) => MetadataKind::QueryParams,
            Self::HeaderParams(_) => MetadataKind::HeaderParams,
            Self::BodyBinding(_) => MetadataKind::BodyBinding,
            Self::CurrentUserBinding(_) => MetadataKind::CurrentUserBinding,
            Self::InjectedParamTokens(_) => MetadataKind::InjectedParamTokens,
            Self::IsLoggedIn(_) => MetadataKind::IsLoggedIn,
            Self::IsNotLoggedIn(_) => MetadataKind::IsNotLoggedIn,
            Self::HasRole(_) => MetadataKind::HasRole,
            Self::ResponseShape(_) => MetadataKind::ResponseShape,
            Self::ModelProperties(_) => MetadataKind::ModelProperties,
        }
    }
}

/// Process-wide metadata store. Thread-safe; overwrite-by-key semantics.
///
/// Callers must treat "absent" and "present-but-empty" as distinct states:
/// an empty parameter list means "registered with no parameters of this
/// kind", a missing record means "never registered".
#[derive(Default)]
pub struct MetadataRegistry {
    records: DashMap<(Subject, MetadataKind), MetadataValue>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record, overwriting any existing record for the same
    /// (subject, kind).
    pub fn set(&self, subject: Subject, value: MetadataValue) {
        self.records.insert((subject, value.kind()), value);
    }

    pub fn get(&self, subject: &Subject, kind: MetadataKind) -> Option<MetadataValue> {
        self.records
            .get(&(subject.clone(), kind))
            .map(|entry| entry.value().clone())
    }

    pub fn routes(&self, class: &ClassKey) -> Option<Vec<RouteRecord>> {
        match self.get(&Subject::Class(*class), MetadataKind::Routes) {
            Some(MetadataValue::Routes(routes)) => Some(routes),
            _ => None,
        }
    }

    pub fn base_route(&self, class: &ClassKey) -> Option<String> {
        match self.get(&Subject::Class(*class), MetadataKind::BaseRoute) {
            Some(MetadataValue::BaseRoute(path)) => Some(path),
            _ => None,
        }
    }

    pub fn named_bindings(&self, subject: &Subject, kind: MetadataKind) -> Option<Vec<NamedBinding>> {
        match self.get(subject, kind) {
            Some(MetadataValue::PathParams(b))
            | Some(MetadataValue::QueryParams(b))
            | Some(MetadataValue::HeaderParams(b)) => Some(b),
            _ => None,
        }
    }

    pub fn body_binding(&self, subject: &Subject) -> Option<BodyBinding> {
        match self.get(subject, MetadataKind::BodyBinding) {
            Some(MetadataValue::BodyBinding(b)) => Some(b),
            _ => None,
        }
    }

    pub fn current_user_binding(&self, subject: &Subject) -> Option<CurrentUserBinding> {
        match self.get(subject, MetadataKind::CurrentUserBinding) {
            Some(MetadataValue::CurrentUserBinding(b)) => Some(b),
            _ => None,
        }
    }

    pub fn injected_tokens(&self, class: &ClassKey) -> Option<BTreeMap<usize, Token>> {
        match self.get(&Subject::Class(*class), MetadataKind::InjectedParamTokens) {
            Some(MetadataValue::InjectedParamTokens(map)) => Some(map),
            _ => None,
        }
    }

    pub fn auth_rule(&self, subject: &Subject, kind: MetadataKind) -> Option<AuthRuleRecord> {
        match self.get(subject, kind) {
            Some(MetadataValue::IsLoggedIn(r))
            | Some(MetadataValue::IsNotLoggedIn(r))
            | Some(MetadataValue::HasRole(r)) => Some(r),
            _ => None,
        }
    }

    pub fn response_shape(&self, subject: &Subject) -> Option<ResponseShape> {
        match self.get(subject, MetadataKind::ResponseShape) {
            Some(MetadataValue::ResponseShape(shape)) => Some(shape),
            _ => None,
        }
    }

    pub fn model(&self, class: &ClassKey) -> Option<ModelSchema> {
        match self.get(&Subject::Class(*class), MetadataKind::ModelProperties) {
            Some(MetadataValue::ModelProperties(schema)) => Some(schema),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
