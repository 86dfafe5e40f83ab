//! # Trellis
//!
//! A metadata-driven web framework core for Rust: explicit registration,
//! eager validation, and a staged request pipeline.
//!
//! Trellis keeps the shape of decorator-first frameworks (controllers,
//! injectable providers, declarative auth rules, parameter bindings) but
//! replaces load-time side effects with an explicit builder. Everything a
//! route needs to run is recorded in a metadata registry, frozen at
//! `build()`, and validated before the first request is served.
//!
//! ## Features
//!
//! - **Dependency Injection**: singleton container with cycle detection and
//!   resolution-chain diagnostics
//! - **Controller-based Routing**: base routes plus method routes, compiled
//!   eagerly onto axum
//! - **Declarative Auth**: logged-in / not-logged-in / role rules with
//!   method-over-class precedence and skip variants
//! - **Typed Parameter Binding**: path, query, header, body, and
//!   current-user bindings validated per request
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use trellis::prelude::*;
//!
//! struct GreetingService;
//!
//! impl GreetingService {
//!     fn greet(&self, name: &str) -> String {
//!         format!("hello, {name}")
//!     }
//! }
//!
//! struct GreetingController {
//!     service: Arc<GreetingService>,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Application::builder()
//!         .provider(Provider::instance(GreetingService))
//!         .controller(
//!             ControllerDef::new::<GreetingController>(Provider::class::<
//!                 GreetingController,
//!                 _,
//!             >(vec![Token::of::<GreetingService>()], |deps| {
//!                 Ok(GreetingController {
//!                     service: trellis::di::dep(&deps, 0)?,
//!                 })
//!             }))
//!             .base_route("/greetings")
//!             .route(
//!                 RouteDef::get("/:name", "greet")
//!                     .path_param(0, "name", ParamSpec::string())
//!                     .handler::<GreetingController, _, _>(1, |c, args| async move {
//!                         let name = args[0].as_str().unwrap_or_default().to_owned();
//!                         HandlerOutcome::json(&c.service.greet(&name))
//!                     }),
//!             ),
//!         )
//!         .build()
//!         .unwrap();
//!
//!     let router = app.into_router().unwrap();
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(listener, router)
//!         .with_graceful_shutdown(trellis::app::shutdown_signal())
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod app;
pub mod auth;
pub mod body;
pub mod di;
pub mod error;
pub mod metadata;
pub mod pipeline;
pub mod router;
pub mod validate;

// Re-export core types
pub use app::{Application, ApplicationBuilder, ControllerDef, RouteDef};
pub use di::{Container, Provider, Token};
pub use error::{Result, TrellisError};
pub use metadata::{ClassKey, MetadataRegistry};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```
/// use trellis::prelude::*;
/// ```
pub mod prelude {
    pub use crate::app::{
        Application, ApplicationBuilder, ControllerDef, RouteDef, shutdown_signal,
    };
    pub use crate::auth::{AuthStrategy, CurrentUser};
    pub use crate::body::{BodyParser, BodyParserRegistry};
    pub use crate::di::{Container, Provider, Token, dep, repository_token_for};
    pub use crate::error::{Problem, Result, TrellisError};
    pub use crate::metadata::records::ModelSchema;
    pub use crate::metadata::{ClassKey, MetadataRegistry, Subject};
    pub use crate::pipeline::handler::{ArgValue, HandlerOutcome};
    pub use crate::validate::{Constraint, ParamSpec, ValueType};
    pub use async_trait::async_trait;
    pub use axum::{
        Json, Router,
        http::StatusCode,
        response::{IntoResponse, Response},
    };
    pub use std::sync::Arc;
}
