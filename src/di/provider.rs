use std::any::Any;
use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use crate::di::container::Container;
use crate::di::lifecycle::Lifecycle;
use crate::di::token::Token;
use crate::error::Result;

/// A type-erased singleton instance.
pub type AnyInstance = Arc<dyn Any + Send + Sync>;

/// Synchronous constructor: receives the resolved dependencies in
/// declaration order and builds the instance.
pub type ConstructFn = Arc<dyn Fn(&[AnyInstance]) -> Result<AnyInstance> + Send + Sync>;

pub type FactoryFuture = Pin<Box<dyn Future<Output = Result<AnyInstance>> + Send>>;

/// Asynchronous factory: receives a container handle and may resolve
/// further dependencies or perform I/O before producing the instance.
pub type FactoryFn = Arc<dyn Fn(Container) -> FactoryFuture + Send + Sync>;

/// Construction recipe. Exactly one form exists per provider by
/// construction; a provider with neither form is unrepresentable.
#[derive(Clone)]
pub enum Recipe {
    Class {
        dependencies: Vec<Token>,
        construct: ConstructFn,
    },
    Factory {
        produce: FactoryFn,
    },
}

/// A registered (token → construction recipe) entry. Immutable after
/// registration.
#[derive(Clone)]
pub struct Provider {
    token: Token,
    recipe: Recipe,
    registered_at: &'static Location<'static>,
}

impl Provider {
    /// A class provider for `T` with explicit per-position dependency
    /// tokens. The construct closure receives the resolved instances in
    /// the same order.
    #[track_caller]
    pub fn class<T, F>(dependencies: Vec<Token>, construct: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&[AnyInstance]) -> Result<T> + Send + Sync + 'static,
    {
        Self {
            token: Token::of::<T>(),
            recipe: Recipe::Class {
                dependencies,
                construct: Arc::new(move |deps| {
                    let instance = construct(deps)?;
                    Ok(Arc::new(instance) as AnyInstance)
                }),
            },
            registered_at: Location::caller(),
        }
    }

    /// A dependency-free class provider holding a prebuilt value.
    #[track_caller]
    pub fn instance<T: Send + Sync + 'static>(value: T) -> Self {
        let value = Arc::new(value);
        Self {
            token: Token::of::<T>(),
            recipe: Recipe::Class {
                dependencies: Vec::new(),
                construct: Arc::new(move |_| Ok(value.clone() as AnyInstance)),
            },
            registered_at: Location::caller(),
        }
    }

    /// An async factory provider for `T`, registered under `T`'s class
    /// token.
    #[track_caller]
    pub fn factory<T, F, Fut>(produce: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Container) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            token: Token::of::<T>(),
            recipe: Recipe::Factory {
                produce: Arc::new(move |container| {
                    let fut = produce(container);
                    Box::pin(async move { Ok(Arc::new(fut.await?) as AnyInstance) })
                }),
            },
            registered_at: Location::caller(),
        }
    }

    /// Re-key this provider under a different token (aliasing). The
    /// singleton cache uses the provider's own token, so all aliases of a
    /// recipe share one instance slot.
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = token;
        self
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }

    pub fn registered_at(&self) -> &'static Location<'static> {
        self.registered_at
    }
}

/// Downcast the dependency at `index` to its concrete type, for use inside
/// a class provider's construct closure.
pub fn dep<T: Send + Sync + 'static>(deps: &[AnyInstance], index: usize) -> Result<Arc<T>> {
    deps.get(index)
        .cloned()
        .ok_or_else(|| {
            crate::error::TrellisError::internal(format!("dependency #{index} was not resolved"))
        })?
        .downcast::<T>()
        .map_err(|_| {
            crate::error::TrellisError::internal(format!(
                "dependency #{index} is not a {}",
                std::any::type_name::<T>()
            ))
        })
}

/// The (token → recipe) table, populated once while the application is
/// configuring and read-only afterward. Registration and removal are
/// rejected with a `Lifecycle` error once the application is initialized.
#[derive(Clone, Default)]
pub struct ProviderTable {
    providers: Arc<DashMap<Token, Provider>>,
    lifecycle: Lifecycle,
}

impl ProviderTable {
    pub fn new(lifecycle: Lifecycle) -> Self {
        Self {
            providers: Arc::new(DashMap::new()),
            lifecycle,
        }
    }

    pub fn register(&self, provider: Provider) -> Result<()> {
        self.lifecycle.ensure_configuring("register a provider")?;
        tracing::debug!(token = %provider.token(), "provider registered");
        self.providers.insert(provider.token.clone(), provider);
        Ok(())
    }

    /// Remove a provider entry. Any already-cached instance is left in
    /// place; this is a configuration-time-only operation.
    pub fn unregister(&self, token: &Token) -> Result<()> {
        self.lifecycle.ensure_configuring("unregister a provider")?;
        self.providers.remove(token);
        Ok(())
    }

    pub fn get(&self, token: &Token) -> Option<Provider> {
        self.providers.get(token).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.providers.contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TrellisError;

    struct Greeter {
        greeting: String,
    }

    #[test]
    fn register_then_lookup() {
        let table = ProviderTable::new(Lifecycle::new());
        table
            .register(Provider::instance(Greeter {
                greeting: "hi".into(),
            }))
            .unwrap();

        assert!(table.contains(&Token::of::<Greeter>()));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn register_after_initialization_fails() {
        let lifecycle = Lifecycle::new();
        let table = ProviderTable::new(lifecycle.clone());
        lifecycle.mark_initialized();

        let err = table
            .register(Provider::instance(Greeter {
                greeting: "late".into(),
            }))
            .unwrap_err();
        assert!(matches!(err, TrellisError::Lifecycle(_)));
    }

    #[test]
    fn unregister_is_configuration_time_only() {
        let lifecycle = Lifecycle::new();
        let table = ProviderTable::new(lifecycle.clone());
        table
            .register(Provider::instance(Greeter {
                greeting: "hi".into(),
            }))
            .unwrap();

        lifecycle.mark_running();
        assert!(table.unregister(&Token::of::<Greeter>()).is_err());
    }
}
