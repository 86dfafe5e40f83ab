//! Body parser registry. The dispatcher hands the request to exactly one
//! parser whose declared content type matches; zero or several matches is
//! a configuration error, not a client error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Problem, Result, TrellisError};
use crate::metadata::records::BodyBinding;
use crate::pipeline::Inbound;

#[async_trait]
pub trait BodyParser: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Whether this parser handles the request's content type. `None`
    /// means the request carried no `Content-Type` header.
    fn matches(&self, content_type: Option<&str>) -> bool;

    async fn parse(&self, request: &Inbound, binding: &BodyBinding) -> Result<Value>;
}

#[derive(Clone, Default)]
pub struct BodyParserRegistry {
    parsers: Vec<Arc<dyn BodyParser>>,
}

impl BodyParserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in JSON parser only.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonBodyParser));
        registry
    }

    pub fn register(&mut self, parser: Arc<dyn BodyParser>) {
        self.parsers.push(parser);
    }

    pub async fn parse(&self, request: &Inbound, binding: &BodyBinding) -> Result<Value> {
        let content_type = request.content_type();
        let matching: Vec<_> = self
            .parsers
            .iter()
            .filter(|p| p.matches(content_type.as_deref()))
            .collect();

        match matching.as_slice() {
            [parser] => parser.parse(request, binding).await,
            [] => Err(TrellisError::lifecycle(format!(
                "no body parser matches content type {}",
                content_type.as_deref().unwrap_or("(none)")
            ))),
            several => Err(TrellisError::lifecycle(format!(
                "multiple body parsers match content type {}: {}",
                content_type.as_deref().unwrap_or("(none)"),
                several
                    .iter()
                    .map(|p| p.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }
}

/// Built-in JSON parser. Also accepts requests without a content type, so
/// bodyless JSON clients keep working.
pub struct JsonBodyParser;

#[async_trait]
impl BodyParser for JsonBodyParser {
    fn name(&self) -> &str {
        "json"
    }

    fn matches(&self, content_type: Option<&str>) -> bool {
        match content_type {
            Some(ct) => ct.starts_with("application/json"),
            None => true,
        }
    }

    async fn parse(&self, request: &Inbound, _binding: &BodyBinding) -> Result<Value> {
        if request.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&request.body).map_err(|_| {
            TrellisError::Validation(vec![Problem::new("body", "body should be valid JSON")])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ParamSpec;
    use axum::http::header;
    use serde_json::json;

    fn binding() -> BodyBinding {
        BodyBinding {
            index: 0,
            spec: ParamSpec::string(),
        }
    }

    fn json_request(body: &str) -> Inbound {
        let mut request = Inbound {
            body: body.as_bytes().to_vec().into(),
            ..Default::default()
        };
        request
            .headers
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        request
    }

    #[tokio::test]
    async fn single_matching_parser_is_used() {
        let registry = BodyParserRegistry::with_defaults();
        let value = registry
            .parse(&json_request(r#"{"a":1}"#), &binding())
            .await
            .unwrap();
        assert_eq!(value, json!({"a": 1}));
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let registry = BodyParserRegistry::with_defaults();
        let err = registry
            .parse(&json_request("{nope"), &binding())
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::Validation(_)));
    }

    #[tokio::test]
    async fn zero_matches_is_a_configuration_error() {
        let registry = BodyParserRegistry::with_defaults();
        let mut request = json_request("{}");
        request.headers.insert(
            header::CONTENT_TYPE,
            "multipart/form-data".parse().unwrap(),
        );

        let err = registry.parse(&request, &binding()).await.unwrap_err();
        assert!(matches!(err, TrellisError::Lifecycle(_)));
    }

    #[tokio::test]
    async fn multiple_matches_is_a_configuration_error() {
        let mut registry = BodyParserRegistry::with_defaults();
        registry.register(Arc::new(JsonBodyParser));

        let err = registry
            .parse(&json_request("{}"), &binding())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("multiple body parsers"));
    }
}
