//! Dependency injection: tokens, providers, and the resolving container.

mod container;
mod lifecycle;
mod provider;
mod token;

pub use container::Container;
pub use lifecycle::{AppPhase, Lifecycle};
pub use provider::{
    AnyInstance, ConstructFn, FactoryFn, FactoryFuture, Provider, ProviderTable, Recipe, dep,
};
pub use token::{ClassToken, Token, repository_token_for};
