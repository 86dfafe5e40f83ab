//! Route compiler: turns the metadata registry's controller records into
//! an ordered list of mount points, validating configuration eagerly, and
//! mounts them on an axum router.

use std::borrow::Cow;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::http::Method;
use axum::routing::MethodFilter;

use crate::auth::{AuthPlan, RoleRule, RuleScope};
use crate::di::Token;
use crate::error::{Result, TrellisError};
use crate::metadata::records::{AppliedRule, ResponseShape};
use crate::metadata::{ClassKey, MetadataKind, MetadataRegistry, Subject};
use crate::pipeline::handler::HandlerFn;
use crate::pipeline::{BindingPlan, DispatchState, dispatch};

/// A compiled (HTTP method, path) route bound to a handler and its
/// parameter plan. Immutable once compiled.
#[derive(Clone)]
pub struct MountPoint {
    pub method: Method,
    pub full_path: String,
    pub controller: ClassKey,
    pub controller_token: Token,
    pub handler_name: Cow<'static, str>,
    pub handler: HandlerFn,
    pub arity: usize,
    pub plan: BindingPlan,
    pub auth: AuthPlan,
    pub shape: Option<ResponseShape>,
}

impl MountPoint {
    pub fn handler_id(&self) -> String {
        format!("{}.{}", self.controller.short_name(), self.handler_name)
    }
}

impl std::fmt::Debug for MountPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountPoint")
            .field("method", &self.method)
            .field("full_path", &self.full_path)
            .field("handler", &self.handler_id())
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// Compile every registered controller, in registration order, into mount
/// points. A controller with route records but no base route is a fatal
/// configuration error, as is declaring an auth rule together with its
/// skip variant at the same level.
pub fn compile(registry: &MetadataRegistry, controllers: &[ClassKey]) -> Result<Vec<MountPoint>> {
    let mut mounts = Vec::new();

    for class in controllers {
        let routes = registry.routes(class).unwrap_or_default();
        if routes.is_empty() {
            continue;
        }
        let base = registry
            .base_route(class)
            .ok_or_else(|| TrellisError::MissingBaseRoute {
                controller: class.short_name().to_string(),
            })?;

        for route in routes {
            let subject = Subject::Method(*class, route.handler_name.clone());
            let plan = BindingPlan {
                path: registry
                    .named_bindings(&subject, MetadataKind::PathParams)
                    .unwrap_or_default(),
                query: registry
                    .named_bindings(&subject, MetadataKind::QueryParams)
                    .unwrap_or_default(),
                header: registry
                    .named_bindings(&subject, MetadataKind::HeaderParams)
                    .unwrap_or_default(),
                body: registry.body_binding(&subject),
                current_user: registry.current_user_binding(&subject),
            };
            let auth = compile_auth(registry, class, &subject)?;
            let shape = registry.response_shape(&subject);

            // Plain concatenation; slash hygiene is the author's job.
            let full_path = format!("{base}{}", route.path);
            tracing::debug!(method = %route.method, path = %full_path, "route compiled");

            mounts.push(MountPoint {
                method: route.method,
                full_path,
                controller: *class,
                controller_token: Token::from_class_key(*class),
                handler_name: route.handler_name,
                handler: route.handler,
                arity: route.arity,
                plan,
                auth,
                shape,
            });
        }
    }

    Ok(mounts)
}

fn compile_auth(
    registry: &MetadataRegistry,
    class: &ClassKey,
    method: &Subject,
) -> Result<AuthPlan> {
    let logged_in = effective_rule(registry, class, method, MetadataKind::IsLoggedIn)?;
    let not_logged_in = effective_rule(registry, class, method, MetadataKind::IsNotLoggedIn)?;
    let has_role = effective_rule(registry, class, method, MetadataKind::HasRole)?;

    Ok(AuthPlan {
        logged_in: logged_in.map(|rule| RuleScope {
            strategies: rule.strategies,
        }),
        not_logged_in: not_logged_in.map(|rule| RuleScope {
            strategies: rule.strategies,
        }),
        has_role: has_role.map(|rule| RoleRule {
            roles: rule.roles,
            strategies: rule.strategies,
        }),
    })
}

/// Resolve one rule kind with method-level records taking precedence:
/// a method-level skip suppresses the class rule, a method-level rule
/// replaces it. Rule-plus-skip at the same level is rejected at either
/// level, before any request is served.
fn effective_rule(
    registry: &MetadataRegistry,
    class: &ClassKey,
    method: &Subject,
    kind: MetadataKind,
) -> Result<Option<AppliedRule>> {
    let class_subject = Subject::Class(*class);

    for subject in [method, &class_subject] {
        if let Some(record) = registry.auth_rule(subject, kind)
            && record.applied.is_some()
            && record.skip
        {
            return Err(TrellisError::lifecycle(format!(
                "{subject} declares both {kind} and its skip variant"
            )));
        }
    }

    for subject in [method, &class_subject] {
        if let Some(record) = registry.auth_rule(subject, kind) {
            if record.skip {
                return Ok(None);
            }
            if let Some(applied) = record.applied {
                return Ok(Some(applied));
            }
        }
    }
    Ok(None)
}

/// Translate the metadata path syntax (`/:id`) into axum 0.8's capture
/// syntax (`/{id}`). Only done at mount time; the compiled metadata keeps
/// the original form.
fn to_axum_path(path: &str) -> String {
    path.split('/')
        .map(|segment| match segment.strip_prefix(':') {
            Some(name) => format!("{{{name}}}"),
            None => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Mount every compiled route on an axum router. Each mount point gets
/// one handler that drives the dispatch pipeline.
pub fn into_router(mounts: Vec<MountPoint>, state: DispatchState) -> Result<Router> {
    let mut router = Router::new();

    for mount in mounts {
        let axum_path = to_axum_path(&mount.full_path);
        let filter = MethodFilter::try_from(mount.method.clone()).map_err(|_| {
            TrellisError::lifecycle(format!(
                "HTTP method {} cannot be mounted",
                mount.method
            ))
        })?;

        let mount = Arc::new(mount);
        let dispatch_state = state.clone();
        let endpoint = move |request: Request| {
            let mount = Arc::clone(&mount);
            let dispatch_state = dispatch_state.clone();
            async move { dispatch(mount, dispatch_state, request).await }
        };

        router = router.route(&axum_path, axum::routing::on(filter, endpoint));
    }

    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataValue;
    use crate::metadata::records::{AuthRuleRecord, RouteRecord};
    use crate::pipeline::handler::{HandlerOutcome, adapt};

    struct TestsController;

    fn noop_handler() -> HandlerFn {
        adapt::<TestsController, _, _>(|_c, _a| async { Ok(HandlerOutcome::Empty) })
    }

    fn route(method: Method, path: &str, name: &'static str) -> RouteRecord {
        RouteRecord {
            method,
            path: path.to_string(),
            handler_name: name.into(),
            handler: noop_handler(),
            arity: 0,
        }
    }

    #[test]
    fn base_and_relative_paths_concatenate() {
        let registry = MetadataRegistry::new();
        let class = ClassKey::of::<TestsController>();
        registry.set(
            Subject::Class(class),
            MetadataValue::BaseRoute("/tests".into()),
        );
        registry.set(
            Subject::Class(class),
            MetadataValue::Routes(vec![route(Method::GET, "/:id", "get_by_id")]),
        );

        let mounts = compile(&registry, &[class]).unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].full_path, "/tests/:id");
        assert_eq!(mounts[0].handler_id(), "TestsController.get_by_id");
    }

    #[test]
    fn routes_without_base_route_fail() {
        let registry = MetadataRegistry::new();
        let class = ClassKey::of::<TestsController>();
        registry.set(
            Subject::Class(class),
            MetadataValue::Routes(vec![route(Method::GET, "/", "list")]),
        );

        let err = compile(&registry, &[class]).unwrap_err();
        match err {
            TrellisError::MissingBaseRoute { controller } => {
                assert_eq!(controller, "TestsController");
            }
            other => panic!("expected MissingBaseRoute, got {other:?}"),
        }
    }

    #[test]
    fn rule_and_skip_at_the_same_level_is_fatal() {
        let registry = MetadataRegistry::new();
        let class = ClassKey::of::<TestsController>();
        registry.set(
            Subject::Class(class),
            MetadataValue::BaseRoute("/tests".into()),
        );
        registry.set(
            Subject::Class(class),
            MetadataValue::Routes(vec![route(Method::GET, "/", "list")]),
        );

        let method = Subject::method::<TestsController>("list");
        registry.set(
            method,
            MetadataValue::IsLoggedIn(AuthRuleRecord {
                applied: Some(AppliedRule::default()),
                skip: true,
            }),
        );

        let err = compile(&registry, &[class]).unwrap_err();
        assert!(matches!(err, TrellisError::Lifecycle(_)));
        assert!(err.to_string().contains("skip"));
    }

    #[test]
    fn method_level_skip_suppresses_class_rule() {
        let registry = MetadataRegistry::new();
        let class = ClassKey::of::<TestsController>();
        registry.set(
            Subject::Class(class),
            MetadataValue::BaseRoute("/tests".into()),
        );
        registry.set(
            Subject::Class(class),
            MetadataValue::Routes(vec![route(Method::GET, "/", "list")]),
        );
        registry.set(
            Subject::Class(class),
            MetadataValue::IsLoggedIn(AuthRuleRecord::applied_default()),
        );
        registry.set(
            Subject::method::<TestsController>("list"),
            MetadataValue::IsLoggedIn(AuthRuleRecord {
                applied: None,
                skip: true,
            }),
        );

        let mounts = compile(&registry, &[class]).unwrap();
        assert!(mounts[0].auth.logged_in.is_none());
    }

    #[test]
    fn path_translation_for_axum() {
        assert_eq!(to_axum_path("/tests/:id"), "/tests/{id}");
        assert_eq!(to_axum_path("/a/:x/b/:y"), "/a/{x}/b/{y}");
        assert_eq!(to_axum_path("/plain"), "/plain");
    }
}
