//! Application bootstrap: the explicit registration surface that replaces
//! module-load-time decorator side effects.
//!
//! Registrations flow through builder calls into the metadata registry and
//! provider table; `build()` freezes them (phase → `Initialized`) and
//! compiles the routes eagerly, so every configuration error aborts boot
//! instead of surfacing mid-request.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use tokio::signal;

use crate::auth::AuthStrategy;
use crate::body::{BodyParser, BodyParserRegistry};
use crate::di::{Container, Lifecycle, Provider, ProviderTable, Token};
use crate::error::{Result, TrellisError};
use crate::metadata::records::{
    AppliedRule, AuthRuleRecord, BodyBinding, CurrentUserBinding, ModelSchema, NamedBinding,
    ResponseShape, RouteRecord,
};
use crate::metadata::{ClassKey, MetadataRegistry, MetadataValue, Subject};
use crate::pipeline::DispatchState;
use crate::pipeline::handler::{ArgValue, HandlerFn, HandlerOutcome, adapt};
use crate::router::{self, MountPoint};
use crate::validate::ParamSpec;

/// Auth rule declarations accumulated at one level (controller or route).
#[derive(Clone, Debug, Default)]
struct AuthDecls {
    logged_in: Option<AppliedRule>,
    skip_logged_in: bool,
    not_logged_in: Option<AppliedRule>,
    skip_not_logged_in: bool,
    has_role: Option<AppliedRule>,
    skip_has_role: bool,
}

impl AuthDecls {
    fn write(self, registry: &MetadataRegistry, subject: &Subject) {
        if self.logged_in.is_some() || self.skip_logged_in {
            registry.set(
                subject.clone(),
                MetadataValue::IsLoggedIn(AuthRuleRecord {
                    applied: self.logged_in,
                    skip: self.skip_logged_in,
                }),
            );
        }
        if self.not_logged_in.is_some() || self.skip_not_logged_in {
            registry.set(
                subject.clone(),
                MetadataValue::IsNotLoggedIn(AuthRuleRecord {
                    applied: self.not_logged_in,
                    skip: self.skip_not_logged_in,
                }),
            );
        }
        if self.has_role.is_some() || self.skip_has_role {
            registry.set(
                subject.clone(),
                MetadataValue::HasRole(AuthRuleRecord {
                    applied: self.has_role,
                    skip: self.skip_has_role,
                }),
            );
        }
    }
}

macro_rules! auth_decl_methods {
    () => {
        pub fn is_logged_in(mut self) -> Self {
            self.auth.logged_in = Some(AppliedRule::default());
            self
        }

        /// Restrict the logged-in check to the named strategies.
        pub fn is_logged_in_with(mut self, strategies: Vec<String>) -> Self {
            self.auth.logged_in = Some(AppliedRule {
                strategies: Some(strategies),
                roles: Vec::new(),
            });
            self
        }

        pub fn skip_is_logged_in(mut self) -> Self {
            self.auth.skip_logged_in = true;
            self
        }

        pub fn is_not_logged_in(mut self) -> Self {
            self.auth.not_logged_in = Some(AppliedRule::default());
            self
        }

        pub fn skip_is_not_logged_in(mut self) -> Self {
            self.auth.skip_not_logged_in = true;
            self
        }

        pub fn has_role(mut self, roles: Vec<String>) -> Self {
            self.auth.has_role = Some(AppliedRule {
                strategies: None,
                roles,
            });
            self
        }

        pub fn has_role_with(mut self, roles: Vec<String>, strategies: Vec<String>) -> Self {
            self.auth.has_role = Some(AppliedRule {
                strategies: Some(strategies),
                roles,
            });
            self
        }

        pub fn skip_has_role(mut self) -> Self {
            self.auth.skip_has_role = true;
            self
        }
    };
}

/// One route of a controller: method, relative path, handler adapter, and
/// the parameter bindings that make up its binding plan.
pub struct RouteDef {
    method: Method,
    path: String,
    name: Cow<'static, str>,
    handler: Option<HandlerFn>,
    arity: usize,
    path_params: Vec<NamedBinding>,
    query_params: Vec<NamedBinding>,
    header_params: Vec<NamedBinding>,
    body: Option<BodyBinding>,
    current_user: Option<CurrentUserBinding>,
    shape: Option<ResponseShape>,
    auth: AuthDecls,
}

impl RouteDef {
    fn new(method: Method, path: impl Into<String>, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            method,
            path: path.into(),
            name: name.into(),
            handler: None,
            arity: 0,
            path_params: Vec::new(),
            query_params: Vec::new(),
            header_params: Vec::new(),
            body: None,
            current_user: None,
            shape: None,
            auth: AuthDecls::default(),
        }
    }

    pub fn get(path: impl Into<String>, name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Method::GET, path, name)
    }

    pub fn post(path: impl Into<String>, name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Method::POST, path, name)
    }

    pub fn put(path: impl Into<String>, name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Method::PUT, path, name)
    }

    pub fn patch(path: impl Into<String>, name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Method::PATCH, path, name)
    }

    pub fn delete(path: impl Into<String>, name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(Method::DELETE, path, name)
    }

    /// The handler body. `arity` is the handler's declared parameter
    /// count; dispatch fails fast when the bindings do not cover it.
    pub fn handler<C, F, Fut>(mut self, arity: usize, f: F) -> Self
    where
        C: Send + Sync + 'static,
        F: Fn(Arc<C>, Vec<ArgValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerOutcome>> + Send + 'static,
    {
        self.handler = Some(adapt(f));
        self.arity = arity;
        self
    }

    pub fn path_param(mut self, index: usize, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.path_params.push(NamedBinding {
            index,
            name: name.into(),
            spec,
        });
        self
    }

    pub fn query_param(mut self, index: usize, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.query_params.push(NamedBinding {
            index,
            name: name.into(),
            spec,
        });
        self
    }

    pub fn header_param(mut self, index: usize, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.header_params.push(NamedBinding {
            index,
            name: name.into(),
            spec,
        });
        self
    }

    pub fn body(mut self, index: usize, spec: ParamSpec) -> Self {
        self.body = Some(BodyBinding { index, spec });
        self
    }

    pub fn current_user(mut self, index: usize) -> Self {
        self.current_user = Some(CurrentUserBinding {
            index,
            required: true,
        });
        self
    }

    pub fn current_user_optional(mut self, index: usize) -> Self {
        self.current_user = Some(CurrentUserBinding {
            index,
            required: false,
        });
        self
    }

    /// Success status for this route's mapped responses (e.g. 201 for a
    /// create route).
    pub fn response_status(mut self, status: u16) -> Self {
        let shape = self.shape.get_or_insert(ResponseShape {
            model: None,
            status: None,
        });
        shape.status = Some(status);
        self
    }

    /// Declared response model, for projection consumers such as document
    /// generators.
    pub fn response_model<M: 'static>(mut self) -> Self {
        let shape = self.shape.get_or_insert(ResponseShape {
            model: None,
            status: None,
        });
        shape.model = Some(ClassKey::of::<M>());
        self
    }

    auth_decl_methods!();
}

/// A controller registration: its DI provider, base route, routes, and
/// class-level auth rules.
pub struct ControllerDef {
    class: ClassKey,
    provider: Provider,
    base_route: Option<String>,
    routes: Vec<RouteDef>,
    auth: AuthDecls,
}

impl ControllerDef {
    pub fn new<C: Send + Sync + 'static>(provider: Provider) -> Self {
        Self {
            class: ClassKey::of::<C>(),
            provider,
            base_route: None,
            routes: Vec::new(),
            auth: AuthDecls::default(),
        }
    }

    pub fn base_route(mut self, path: impl Into<String>) -> Self {
        self.base_route = Some(path.into());
        self
    }

    pub fn route(mut self, route: RouteDef) -> Self {
        self.routes.push(route);
        self
    }

    auth_decl_methods!();
}

/// Collects registrations through explicit calls and freezes them into an
/// immutable snapshot before constructing the container and compiling the
/// routes.
pub struct ApplicationBuilder {
    registry: Arc<MetadataRegistry>,
    providers: Vec<Provider>,
    controllers: Vec<ClassKey>,
    strategies: Vec<Arc<dyn AuthStrategy>>,
    parsers: BodyParserRegistry,
    errors: Vec<TrellisError>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(MetadataRegistry::new()),
            providers: Vec::new(),
            controllers: Vec::new(),
            strategies: Vec::new(),
            parsers: BodyParserRegistry::with_defaults(),
            errors: Vec::new(),
        }
    }

    pub fn provider(mut self, provider: Provider) -> Self {
        self.providers.push(provider);
        self
    }

    /// Override the inferred dependency token at one constructor position
    /// of `C`.
    pub fn inject_token<C: 'static>(self, index: usize, token: Token) -> Self {
        let class = ClassKey::of::<C>();
        let mut map = self
            .registry
            .injected_tokens(&class)
            .unwrap_or_else(BTreeMap::new);
        map.insert(index, token);
        self.registry
            .set(Subject::Class(class), MetadataValue::InjectedParamTokens(map));
        self
    }

    /// Register the property metadata of a validatable model.
    pub fn model<M: 'static>(self, schema: ModelSchema) -> Self {
        self.registry.set(
            Subject::class::<M>(),
            MetadataValue::ModelProperties(schema),
        );
        self
    }

    pub fn strategy<S: AuthStrategy>(mut self, strategy: S) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn body_parser<P: BodyParser>(mut self, parser: P) -> Self {
        self.parsers.register(Arc::new(parser));
        self
    }

    /// Register a controller: writes its metadata records and queues its
    /// provider.
    pub fn controller(mut self, def: ControllerDef) -> Self {
        let class = def.class;
        let class_subject = Subject::Class(class);

        if let Some(base) = def.base_route {
            self.registry
                .set(class_subject.clone(), MetadataValue::BaseRoute(base));
        }
        def.auth.write(&self.registry, &class_subject);

        let mut records = Vec::new();
        for route in def.routes {
            let Some(handler) = route.handler else {
                self.errors.push(TrellisError::lifecycle(format!(
                    "route {}.{} has no handler",
                    class.short_name(),
                    route.name
                )));
                continue;
            };

            let subject = Subject::Method(class, route.name.clone());
            if !route.path_params.is_empty() {
                self.registry
                    .set(subject.clone(), MetadataValue::PathParams(route.path_params));
            }
            if !route.query_params.is_empty() {
                self.registry.set(
                    subject.clone(),
                    MetadataValue::QueryParams(route.query_params),
                );
            }
            if !route.header_params.is_empty() {
                self.registry.set(
                    subject.clone(),
                    MetadataValue::HeaderParams(route.header_params),
                );
            }
            if let Some(body) = route.body {
                self.registry
                    .set(subject.clone(), MetadataValue::BodyBinding(body));
            }
            if let Some(user) = route.current_user {
                self.registry
                    .set(subject.clone(), MetadataValue::CurrentUserBinding(user));
            }
            if let Some(shape) = route.shape {
                self.registry
                    .set(subject.clone(), MetadataValue::ResponseShape(shape));
            }
            route.auth.write(&self.registry, &subject);

            records.push(RouteRecord {
                method: route.method,
                path: route.path,
                handler_name: route.name,
                handler,
                arity: route.arity,
            });
        }

        self.registry
            .set(class_subject, MetadataValue::Routes(records));
        self.providers.push(def.provider);
        self.controllers.push(class);
        self
    }

    /// Freeze the registrations, build the container, and compile every
    /// route. All configuration errors surface here and abort boot.
    pub fn build(self) -> Result<Application> {
        if let Some(error) = self.errors.into_iter().next() {
            return Err(error);
        }

        let lifecycle = Lifecycle::new();
        let table = ProviderTable::new(lifecycle.clone());
        for provider in self.providers {
            table.register(provider)?;
        }

        let container = Container::new(table, Arc::clone(&self.registry), lifecycle.clone());
        let mounts = router::compile(&self.registry, &self.controllers)?;

        lifecycle.mark_initialized();
        tracing::info!(
            mounts = mounts.len(),
            strategies = self.strategies.len(),
            "application initialized"
        );

        Ok(Application {
            container,
            mounts,
            strategies: self.strategies,
            parsers: Arc::new(self.parsers),
        })
    }
}

/// The built application: a frozen container plus compiled mount points.
pub struct Application {
    container: Container,
    mounts: Vec<MountPoint>,
    strategies: Vec<Arc<dyn AuthStrategy>>,
    parsers: Arc<BodyParserRegistry>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn mount_points(&self) -> &[MountPoint] {
        &self.mounts
    }

    /// Mount the compiled routes on an axum router and mark the
    /// application running.
    pub fn into_router(self) -> Result<Router> {
        self.container.lifecycle().mark_running();
        router::into_router(
            self.mounts,
            DispatchState {
                container: self.container,
                strategies: self.strategies,
                parsers: self.parsers,
            },
        )
    }
}

/// Completes when SIGINT or SIGTERM is received; pair with axum's
/// `with_graceful_shutdown`.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct HealthController;

    fn health_controller() -> ControllerDef {
        ControllerDef::new::<HealthController>(Provider::instance(HealthController))
            .base_route("/health")
            .route(
                RouteDef::get("/", "check").handler::<HealthController, _, _>(0, |_c, _a| async {
                    Ok(HandlerOutcome::Empty)
                }),
            )
    }

    #[test]
    fn build_freezes_provider_registration() {
        let app = ApplicationBuilder::new()
            .controller(health_controller())
            .build()
            .unwrap();

        struct LateService;
        let err = app
            .container()
            .providers()
            .register(Provider::instance(LateService))
            .unwrap_err();
        assert!(matches!(err, TrellisError::Lifecycle(_)));
    }

    #[test]
    fn response_shape_is_recorded_per_method() {
        struct Status;
        let builder = ApplicationBuilder::new().controller(
            ControllerDef::new::<HealthController>(Provider::instance(HealthController))
                .base_route("/health")
                .route(
                    RouteDef::get("/status", "status")
                        .response_status(204)
                        .response_model::<Status>()
                        .handler::<HealthController, _, _>(0, |_c, _a| async {
                            Ok(HandlerOutcome::Empty)
                        }),
                ),
        );

        let subject = Subject::method::<HealthController>("status");
        let shape = builder.registry.response_shape(&subject).unwrap();
        assert_eq!(shape.status, Some(204));
        assert_eq!(shape.model, Some(ClassKey::of::<Status>()));
    }

    #[test]
    fn rule_and_skip_conflict_fails_at_build_time() {
        let err = ApplicationBuilder::new()
            .controller(
                ControllerDef::new::<HealthController>(Provider::instance(HealthController))
                    .base_route("/health")
                    .route(
                        RouteDef::get("/", "check")
                            .is_logged_in()
                            .skip_is_logged_in()
                            .handler::<HealthController, _, _>(0, |_c, _a| async {
                                Ok(HandlerOutcome::Empty)
                            }),
                    ),
            )
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, TrellisError::Lifecycle(_)));
    }

    #[test]
    fn route_without_handler_fails_at_build_time() {
        let err = ApplicationBuilder::new()
            .controller(
                ControllerDef::new::<HealthController>(Provider::instance(HealthController))
                    .base_route("/health")
                    .route(RouteDef::get("/", "check")),
            )
            .build()
            .err()
            .unwrap();
        assert!(err.to_string().contains("no handler"));
    }

    #[test]
    fn missing_base_route_fails_at_build_time() {
        let err = ApplicationBuilder::new()
            .controller(
                ControllerDef::new::<HealthController>(Provider::instance(HealthController))
                    .route(
                        RouteDef::get("/", "check").handler::<HealthController, _, _>(
                            0,
                            |_c, _a| async { Ok(HandlerOutcome::Empty) },
                        ),
                    ),
            )
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, TrellisError::MissingBaseRoute { .. }));
    }
}
