//! Request pipeline: per-request dispatch through the ordered stages
//! authorization → parameter resolution/validation → completeness check →
//! invocation → response mapping, with a single error-mapping boundary.

pub mod handler;
pub mod params;

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{FromRequestParts, Query, RawPathParams, Request};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::auth::{AuthStrategy, authorize, resolve_any_user};
use crate::body::BodyParserRegistry;
use crate::di::Container;
use crate::error::{Result, TrellisError, render};
use crate::router::MountPoint;

pub use handler::{ArgValue, HandlerFn, HandlerOutcome};
pub use params::{BindingPlan, resolve_parameters};

/// Transport-adapter boundary: everything the pipeline reads from an
/// inbound request, snapshotted once so strategies and parsers can share
/// it without touching the transport again.
#[derive(Debug, Default)]
pub struct Inbound {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
}

impl Inbound {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<String> {
        self.header(header::CONTENT_TYPE.as_str()).map(str::to_string)
    }
}

/// Per-request state machine. `Error` is reachable from every stage; both
/// `Done` and `Error` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum RequestState {
    Received,
    Authorizing,
    ResolvingParams,
    Validating,
    Invoking,
    Responding,
    Done,
    Error,
}

/// Everything a mounted handler needs at dispatch time.
#[derive(Clone)]
pub struct DispatchState {
    pub container: Container,
    pub strategies: Vec<Arc<dyn AuthStrategy>>,
    pub parsers: Arc<BodyParserRegistry>,
}

fn advance(request_id: Uuid, state: &mut RequestState, to: RequestState) {
    tracing::debug!(request = %request_id, from = %state, to = %to, "pipeline state");
    *state = to;
}

/// Entry point for one mounted route. Runs the pipeline and maps any
/// stage error through the single error-mapping boundary.
pub async fn dispatch(mount: Arc<MountPoint>, state: DispatchState, request: Request) -> Response {
    let request_id = Uuid::new_v4();
    let wants_html = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("text/html") && !accept.contains("application/json"))
        .unwrap_or(false);

    match run(&mount, &state, request, request_id).await {
        Ok(response) => response,
        Err(error) => {
            tracing::debug!(request = %request_id, to = %RequestState::Error, "pipeline state");
            render(&error, wants_html)
        }
    }
}

async fn run(
    mount: &MountPoint,
    state: &DispatchState,
    request: Request,
    request_id: Uuid,
) -> Result<Response> {
    let mut stage = RequestState::Received;
    tracing::debug!(
        request = %request_id,
        method = %request.method(),
        path = %mount.full_path,
        handler = %mount.handler_id(),
        "dispatching"
    );

    let (mut parts, body) = request.into_parts();
    let path_params: HashMap<String, String> = RawPathParams::from_request_parts(&mut parts, &())
        .await
        .map(|raw| {
            raw.iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
        })
        .unwrap_or_default();
    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(map)| map)
        .unwrap_or_default();
    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| TrellisError::internal(format!("failed to read request body: {e}")))?;

    let inbound = Arc::new(Inbound {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        path_params,
        query,
        body,
    });

    advance(request_id, &mut stage, RequestState::Authorizing);
    let mut user = authorize(&mount.auth, &state.strategies, &inbound).await?;
    if user.is_none() && mount.plan.current_user.is_some() {
        // No auth rule ran but a handler parameter wants the user.
        user = resolve_any_user(&state.strategies, None, &inbound).await;
    }

    advance(request_id, &mut stage, RequestState::ResolvingParams);
    advance(request_id, &mut stage, RequestState::Validating);
    let args = resolve_parameters(
        &mount.plan,
        mount.arity,
        &mount.handler_id(),
        &inbound,
        user.as_ref(),
        state.container.registry(),
        &state.parsers,
    )
    .await?;

    advance(request_id, &mut stage, RequestState::Invoking);
    let instance = state.container.resolve_token(&mount.controller_token).await?;
    let outcome = (mount.handler)(instance, args).await?;

    advance(request_id, &mut stage, RequestState::Responding);
    let success = mount
        .shape
        .and_then(|shape| shape.status)
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);
    let response = match outcome {
        HandlerOutcome::Raw(response) => response,
        HandlerOutcome::Json(value) => (success, axum::Json(value)).into_response(),
        HandlerOutcome::Empty => success.into_response(),
    };

    advance(request_id, &mut stage, RequestState::Done);
    Ok(response)
}
