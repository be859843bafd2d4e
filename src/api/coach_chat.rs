use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};

use crate::error::ProxyError;
use crate::observability::log_stream_outcome;
use crate::protocol::chat::decode_coach_chat_request;
use crate::state::AppState;
use crate::stream::TextStream;
use crate::upstream::UpstreamStream;

/// Header carrying the caller identity established by the identity provider.
const CALLER_ID_HEADER: &str = "x-caller-id";
const REQUEST_ID_HEADER: &str = "x-request-id";

/// Streaming coach chat handler.
///
/// Either a single JSON error (anything that fails before upstream headers
/// arrive) or a chunked plain-text stream; never both.
pub(crate) async fn handler(state: Arc<AppState>, headers: &HeaderMap, body: bytes::Bytes) -> Response {
    let request_id = state.next_request_id().to_string();
    let caller = caller_identity(headers);
    let started = Instant::now();

    match open_upstream(&state, &body).await {
        Ok(upstream) => {
            tracing::debug!(
                request_id = %request_id,
                caller = caller.as_deref().unwrap_or("-"),
                upstream_status = upstream.status.as_u16(),
                "upstream accepted, streaming coach response"
            );
            text_stream_response(upstream, request_id, caller, started)
        }
        Err(err) => {
            log_rejection(&request_id, caller.as_deref(), &err);
            let mut response = err.into_response();
            insert_request_id(&mut response, &request_id);
            response
        }
    }
}

async fn open_upstream(state: &AppState, body: &[u8]) -> Result<UpstreamStream, ProxyError> {
    let request = decode_coach_chat_request(body)?;
    let system_directive = request
        .system_prompt
        .as_deref()
        .or(state.config.features.default_system_prompt.as_deref());
    state
        .initiator
        .open_stream(&request.messages, system_directive)
        .await
}

fn text_stream_response(
    upstream: UpstreamStream,
    request_id: String,
    caller: Option<String>,
    started: Instant,
) -> Response {
    let log_request_id = request_id.clone();
    let text_stream = TextStream::new(
        upstream.body,
        Box::new(move |outcome| {
            log_stream_outcome(
                &log_request_id,
                caller.as_deref(),
                &outcome,
                started.elapsed(),
            );
        }),
    );

    let mut response = Response::new(Body::from_stream(text_stream));
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::HeaderName::from_static("x-accel-buffering"),
        http::HeaderValue::from_static("no"),
    );
    insert_request_id(&mut response, &request_id);
    response
}

fn insert_request_id(response: &mut Response, request_id: &str) {
    if let Ok(value) = http::HeaderValue::from_str(request_id) {
        response
            .headers_mut()
            .insert(http::HeaderName::from_static(REQUEST_ID_HEADER), value);
    }
}

fn caller_identity(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CALLER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn log_rejection(request_id: &str, caller: Option<&str>, err: &ProxyError) {
    let caller = caller.unwrap_or("-");
    match err {
        ProxyError::InvalidInput(_) => {
            tracing::debug!(request_id, caller, error = %err, "rejected coach chat request");
        }
        ProxyError::NotConfigured(_) | ProxyError::Internal(_) => {
            tracing::error!(request_id, caller, error = %err, "coach chat request failed");
        }
        ProxyError::UpstreamUnavailable(_) | ProxyError::UpstreamRejected { .. } => {
            tracing::warn!(request_id, caller, error = %err, "upstream refused coach chat request");
        }
    }
}
