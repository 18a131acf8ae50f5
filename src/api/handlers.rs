use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::mcp::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::session::Message;
use crate::tunnel::TunnelReport;

use super::error::ApiError;
use super::AppState;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    port: u16,
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        port: state.port,
    })
}

pub(super) async fn tunnels(State(state): State<AppState>) -> Json<Vec<TunnelReport>> {
    Json(
        state
            .supervisor
            .as_ref()
            .map(|s| s.get_status())
            .unwrap_or_default(),
    )
}

pub(super) async fn not_found() -> ApiError {
    ApiError::NotFound
}

/// Open a push channel.
///
/// The first event names the URL to POST requests to; every response the
/// engine produces afterwards arrives as a `message` event. The session is
/// unregistered when the client goes away and the stream is dropped.
pub(super) async fn sse(
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let (guard, rx) = state.sessions.open().map_err(|e| {
        tracing::warn!(error = %e, "refusing push channel");
        ApiError::TooManySessions
    })?;
    let endpoint = format!("/message?sessionId={}", guard.id());
    tracing::info!(session_id = %guard.id(), "push channel opened");

    let stream = futures::stream::unfold(
        (Some(endpoint), guard, rx),
        |(endpoint, guard, mut rx)| async move {
            if let Some(endpoint) = endpoint {
                let event = Event::default().event("endpoint").data(endpoint);
                return Some((Ok(event), (None, guard, rx)));
            }
            let message = rx.recv().await?;
            Some((Ok(message_event(&message)), (None, guard, rx)))
        },
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive)))
}

fn message_event(message: &Message) -> Event {
    Event::default().event("message").data(&**message)
}

#[derive(Debug, Deserialize)]
pub(super) struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Handle one JSON-RPC request.
///
/// A body that does not parse is answered with a -32700 error and HTTP 400
/// and goes nowhere else. Every other request gets its response both as the
/// HTTP body and as a `message` event on every open push channel. A query
/// string that does not parse is treated like an unknown session id.
pub(super) async fn message(
    State(state): State<AppState>,
    query: Result<Query<MessageQuery>, QueryRejection>,
    body: Bytes,
) -> Response {
    let request = match JsonRpcRequest::parse(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "unparsable request body");
            let response = JsonRpcResponse::error(None, JsonRpcError::parse_error(e));
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    match &query {
        Ok(Query(MessageQuery {
            session_id: Some(id),
        })) if !state.sessions.contains(id) => {
            tracing::debug!(session_id = %id, "request names an unknown session");
        }
        Ok(_) => {}
        Err(e) => tracing::debug!(error = %e, "ignoring malformed query string"),
    }

    let method = request.method.clone();
    let response = state.handler.handle(request).await;
    if let Some(code) = response.error_code() {
        tracing::debug!(%method, code, "request failed");
    }

    let payload = match serde_json::to_string(&response) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize response");
            return ApiError::InternalError(e.to_string()).into_response();
        }
    };

    let delivered = state.sessions.broadcast(Arc::from(payload.as_str()));
    tracing::debug!(%method, delivered, "response broadcast");

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        payload,
    )
        .into_response()
}

