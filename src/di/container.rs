use std::future::Future;
use std::panic::Location;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use crate::di::lifecycle::Lifecycle;
use crate::di::provider::{AnyInstance, ProviderTable, Recipe};
use crate::di::token::Token;
use crate::error::{Result, TrellisError};
use crate::metadata::MetadataRegistry;

type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<AnyInstance>> + Send + 'a>>;

/// One entry of the explicit resolution stack: the class currently being
/// constructed and where its provider was registered.
struct Frame {
    token: Token,
    registered_at: &'static Location<'static>,
}

/// Thread-safe dependency injection container.
///
/// Resolves a token to its process-lifetime singleton: cache hit returns
/// the existing instance, otherwise the provider's recipe is executed with
/// all its dependencies resolved recursively. An explicit resolution stack
/// is threaded through the recursion so that failures report the full
/// chain of classes under construction, and so that cycles are detected
/// instead of overflowing the native stack.
#[derive(Clone)]
pub struct Container {
    providers: ProviderTable,
    registry: Arc<MetadataRegistry>,
    cache: Arc<DashMap<Token, AnyInstance>>,
    lifecycle: Lifecycle,
}

impl Container {
    pub fn new(
        providers: ProviderTable,
        registry: Arc<MetadataRegistry>,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            providers,
            registry,
            cache: Arc::new(DashMap::new()),
            lifecycle,
        }
    }

    pub fn providers(&self) -> &ProviderTable {
        &self.providers
    }

    pub fn registry(&self) -> &Arc<MetadataRegistry> {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Resolve the singleton behind `token`.
    pub async fn resolve_token(&self, token: &Token) -> Result<AnyInstance> {
        let mut stack = Vec::new();
        self.resolve_inner(token.clone(), None, &mut stack).await
    }

    /// Typed convenience over [`Self::resolve_token`] for class tokens.
    pub async fn resolve<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let instance = self.resolve_token(&Token::of::<T>()).await?;
        instance.downcast::<T>().map_err(|_| {
            TrellisError::internal(format!(
                "resolved instance is not a {}",
                std::any::type_name::<T>()
            ))
        })
    }

    pub fn has_provider(&self, token: &Token) -> bool {
        self.providers.contains(token)
    }

    pub fn is_cached(&self, token: &Token) -> bool {
        self.cache.contains_key(token)
    }

    fn resolve_inner<'a>(
        &'a self,
        token: Token,
        origin: Option<(String, usize)>,
        stack: &'a mut Vec<Frame>,
    ) -> ResolveFuture<'a> {
        Box::pin(async move {
            if let Some(cached) = self.cache.get(&token) {
                return Ok(cached.value().clone());
            }

            if stack.iter().any(|frame| frame.token == token) {
                let chain = stack
                    .iter()
                    .map(|frame| frame.token.to_string())
                    .chain(std::iter::once(token.to_string()))
                    .collect::<Vec<_>>()
                    .join(" -> ");
                return Err(TrellisError::CircularDependency { cycle: chain });
            }

            let Some(provider) = self.providers.get(&token) else {
                return Err(self.no_provider_error(&token, origin.as_ref(), stack));
            };

            let instance = match provider.recipe() {
                Recipe::Class {
                    dependencies,
                    construct,
                } => {
                    let overrides = token
                        .as_class()
                        .and_then(|class| self.registry.injected_tokens(&class.key()));
                    let parent = token.to_string();

                    stack.push(Frame {
                        token: token.clone(),
                        registered_at: provider.registered_at(),
                    });

                    let mut resolved = Vec::with_capacity(dependencies.len());
                    let mut failure = None;
                    for (index, declared) in dependencies.iter().enumerate() {
                        let effective = overrides
                            .as_ref()
                            .and_then(|map| map.get(&index))
                            .unwrap_or(declared)
                            .clone();
                        match self
                            .resolve_inner(effective, Some((parent.clone(), index)), stack)
                            .await
                        {
                            Ok(instance) => resolved.push(instance),
                            Err(err) => {
                                failure = Some(err);
                                break;
                            }
                        }
                    }
                    stack.pop();

                    if let Some(err) = failure {
                        return Err(err);
                    }
                    construct(&resolved)?
                }
                Recipe::Factory { produce } => produce(self.clone()).await?,
            };

            // Cache under the provider's own token, not the requested one,
            // so aliases share a single instance slot.
            self.cache
                .insert(provider.token().clone(), instance.clone());
            if provider.token() != &token {
                self.cache.insert(token.clone(), instance.clone());
            }
            tracing::debug!(token = %token, "singleton constructed");
            Ok(instance)
        })
    }

    fn no_provider_error(
        &self,
        token: &Token,
        origin: Option<&(String, usize)>,
        stack: &[Frame],
    ) -> TrellisError {
        let mut message = match token {
            Token::Symbolic(key) => {
                format!("No provider registered for custom token \"{key}\"")
            }
            Token::Class(class) if class.is_primitive() => match origin {
                Some((parent, index)) => format!(
                    "Parameter #{index} of {parent} is the primitive type {ty}; \
                     declare an explicit injection token for that position",
                    ty = class.key().short_name()
                ),
                None => format!(
                    "{} is a primitive type and cannot identify a provider; \
                     use a symbolic token instead",
                    class.key().short_name()
                ),
            },
            Token::Class(class) => format!(
                "No provider found for {}; did you forget to mark it injectable?",
                class.key().short_name()
            ),
        };

        if !stack.is_empty() {
            message.push_str("\nResolution chain:");
            for frame in stack {
                message.push_str(&format!(
                    "\n  {} (registered at {})",
                    frame.token, frame.registered_at
                ));
            }
        }

        TrellisError::NoProvider { message }
    }
}
