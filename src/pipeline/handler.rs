//! Type-erased handler adapters. Controllers stay plain structs; a route
//! registers a closure that receives the DI-resolved controller instance
//! and the positionally assembled arguments.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::response::Response;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::auth::CurrentUser;
use crate::di::AnyInstance;
use crate::error::{Result, TrellisError};

/// One resolved positional argument.
#[derive(Clone, Debug)]
pub enum ArgValue {
    Json(Value),
    User(CurrentUser),
}

impl ArgValue {
    /// Deserialize the argument into the handler's concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match self {
            Self::Json(value) => value.clone(),
            Self::User(user) => serde_json::to_value(user)
                .map_err(|e| TrellisError::internal(format!("user serialization failed: {e}")))?,
        };
        serde_json::from_value(value)
            .map_err(|e| TrellisError::internal(format!("argument decoding failed: {e}")))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Json(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Json(value) => value.as_i64(),
            Self::User(_) => None,
        }
    }

    pub fn user(&self) -> Option<&CurrentUser> {
        match self {
            Self::User(user) => Some(user),
            Self::Json(_) => None,
        }
    }
}

/// What a handler produced. `Raw` passes an already-built response through
/// response mapping untouched (the handler streamed or rendered itself).
pub enum HandlerOutcome {
    Json(Value),
    Empty,
    Raw(Response),
}

impl HandlerOutcome {
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|e| TrellisError::internal(format!("response serialization failed: {e}")))
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerOutcome>> + Send>>;

/// Erased handler: (controller instance, assembled args) → outcome.
pub type HandlerFn = Arc<dyn Fn(AnyInstance, Vec<ArgValue>) -> HandlerFuture + Send + Sync>;

/// Wrap a typed handler closure into a [`HandlerFn`], downcasting the
/// controller instance to its concrete type.
pub fn adapt<C, F, Fut>(f: F) -> HandlerFn
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Vec<ArgValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HandlerOutcome>> + Send + 'static,
{
    Arc::new(move |instance: AnyInstance, args: Vec<ArgValue>| match instance.downcast::<C>() {
        Ok(controller) => Box::pin(f(controller, args)) as HandlerFuture,
        Err(_) => Box::pin(async {
            Err(TrellisError::internal(format!(
                "controller instance is not a {}",
                std::any::type_name::<C>()
            )))
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoController;

    #[tokio::test]
    async fn adapt_downcasts_and_invokes() {
        let handler = adapt::<EchoController, _, _>(|_controller, args| async move {
            let id: i64 = args[0].decode()?;
            HandlerOutcome::json(&json!({ "id": id }))
        });

        let instance: AnyInstance = Arc::new(EchoController);
        let outcome = handler(instance, vec![ArgValue::Json(json!(7))])
            .await
            .unwrap();
        match outcome {
            HandlerOutcome::Json(value) => assert_eq!(value, json!({ "id": 7 })),
            _ => panic!("expected json outcome"),
        }
    }

    #[tokio::test]
    async fn wrong_controller_type_is_an_internal_error() {
        struct OtherController;
        let handler =
            adapt::<EchoController, _, _>(|_c, _a| async { Ok(HandlerOutcome::Empty) });

        let instance: AnyInstance = Arc::new(OtherController);
        assert!(handler(instance, Vec::new()).await.is_err());
    }
}
