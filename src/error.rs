use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrellisError>;

/// A single offending key inside a [`TrellisError::Validation`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Problem {
    pub key: String,
    pub message: String,
}

impl Problem {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Problem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Crate-wide error taxonomy.
///
/// Configuration-time variants (`Lifecycle`, `NoProvider`,
/// `CircularDependency`, `MissingBaseRoute`, `BindingPlanIncomplete`) are
/// fatal and abort startup or the resolution call that raised them.
/// `Unauthorized` and `Validation` are expected per-request outcomes and map
/// to 401/400 responses; everything else maps to a 500 whose detail is
/// logged but never sent to the client.
#[derive(Debug, Error, strum_macros::IntoStaticStr)]
pub enum TrellisError {
    #[error("{0}")]
    Lifecycle(String),

    #[error("{message}")]
    NoProvider { message: String },

    #[error("Circular dependency detected: {cycle}")]
    CircularDependency { cycle: String },

    #[error("Controller {controller} declares routes but no base route")]
    MissingBaseRoute { controller: String },

    #[error("{0}")]
    Unauthorized(String),

    #[error("Validation failed")]
    Validation(Vec<Problem>),

    #[error(
        "Handler {handler} resolved {resolved} of {expected} parameters; parameter #{index} has no binding source"
    )]
    BindingPlanIncomplete {
        handler: String,
        resolved: usize,
        expected: usize,
        index: usize,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrellisError {
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Internal detail of 500-class errors is
    /// withheld here and logged by [`render`] instead.
    fn public_message(&self) -> String {
        match self {
            Self::Unauthorized(msg) => msg.clone(),
            Self::Validation(_) => "Validation failed".to_string(),
            _ => "Internal Server Error".to_string(),
        }
    }

    /// One paragraph per offending key for validation errors, none otherwise.
    fn paragraphs(&self) -> Vec<String> {
        match self {
            Self::Validation(problems) => problems.iter().map(ToString::to_string).collect(),
            _ => Vec::new(),
        }
    }
}

/// Translate an error into a response, honoring the client's `Accept`
/// header: JSON gets the structured payload, HTML gets a minimal page.
///
/// 500-class errors are logged here with full detail; the response body only
/// ever carries the public message.
pub fn render(error: &TrellisError, wants_html: bool) -> Response {
    let status = error.status();
    let name: &'static str = error.into();
    let message = error.public_message();
    let paragraphs = error.paragraphs();

    if status.is_server_error() {
        tracing::error!(%error, %status, "request failed");
    } else {
        tracing::debug!(%error, %status, "request rejected");
    }

    if wants_html {
        let body = format!(
            "<!DOCTYPE html>\n<html><head><title>{status}</title></head><body>\
             <h1>{} {}</h1><p>{}</p>{}</body></html>",
            status.as_u16(),
            name,
            message,
            paragraphs
                .iter()
                .map(|p| format!("<p>{p}</p>"))
                .collect::<String>(),
        );
        return (
            status,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            body,
        )
            .into_response();
    }

    (
        status,
        Json(json!({
            "status": status.as_u16(),
            "name": name,
            "message": message,
            "paragraphs": paragraphs,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

impl IntoResponse for TrellisError {
    fn into_response(self) -> Response {
        render(&self, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400_with_one_paragraph_per_key() {
        let err = TrellisError::Validation(vec![
            Problem::new("id", "id should be a number"),
            Problem::new("name", "name is required"),
        ]);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.paragraphs().len(), 2);
        assert_eq!(err.paragraphs()[0], "id: id should be a number");
    }

    #[test]
    fn internal_detail_is_not_client_visible() {
        let err = TrellisError::internal("connection string leaked");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.public_message().contains("connection string"));
    }

    #[test]
    fn variant_name_matches_payload_name() {
        let err = TrellisError::unauthorized("nope");
        let name: &'static str = (&err).into();
        assert_eq!(name, "Unauthorized");
    }
}
