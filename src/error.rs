use serde_json::{json, Value};

/// Error type shared by the initiator, the transcoder wiring and the handlers.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Not configured: {0}")]
    NotConfigured(String),
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Upstream rejected request: status={status}, message={message}")]
    UpstreamRejected { status: u16, message: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code and `error.type` selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Configuration,
    UpstreamUnavailable,
    UpstreamRejected,
    ServerError,
}

impl ErrorCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::InvalidRequest => "invalid_request_error",
            ErrorCategory::Configuration => "configuration_error",
            ErrorCategory::UpstreamUnavailable => "upstream_unavailable",
            ErrorCategory::UpstreamRejected => "upstream_error",
            ErrorCategory::ServerError => "server_error",
        }
    }
}

impl ProxyError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            ProxyError::InvalidInput(_) => ErrorCategory::InvalidRequest,
            ProxyError::NotConfigured(_) => ErrorCategory::Configuration,
            ProxyError::UpstreamUnavailable(_) => ErrorCategory::UpstreamUnavailable,
            ProxyError::UpstreamRejected { .. } => ErrorCategory::UpstreamRejected,
            ProxyError::Internal(_) => ErrorCategory::ServerError,
        }
    }

    /// HTTP status the caller sees for this error.
    ///
    /// A rejected upstream call reuses the upstream status so the caller can
    /// tell an expired credential (401) from provider overload (429/5xx).
    #[must_use]
    pub fn http_status(&self) -> http::StatusCode {
        match self {
            ProxyError::InvalidInput(_) => http::StatusCode::BAD_REQUEST,
            ProxyError::NotConfigured(_) | ProxyError::Internal(_) => {
                http::StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::UpstreamUnavailable(_) => http::StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamRejected { status, .. } => upstream_status_passthrough(*status),
        }
    }
}

fn upstream_status_passthrough(status: u16) -> http::StatusCode {
    match http::StatusCode::from_u16(status) {
        Ok(code) if code.is_client_error() || code.is_server_error() => code,
        _ => http::StatusCode::BAD_GATEWAY,
    }
}

/// Format an error as `(status_code, JSON body)`.
#[must_use]
pub fn format_error(err: &ProxyError) -> (http::StatusCode, Value) {
    let status = err.http_status();
    let mut error = json!({
        "message": err.to_string(),
        "type": err.category().as_str(),
        "code": status.as_u16(),
    });
    if let ProxyError::UpstreamRejected {
        status: upstream_status,
        ..
    } = err
    {
        error["upstream_status"] = json!(upstream_status);
    }
    (status, json!({ "error": error }))
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

impl axum::response::IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        let (status, body) = format_error(&self);
        (status, axum::Json(body)).into_response()
    }
}

/// Sanitize an upstream error body to avoid leaking internal details.
///
/// Extracts `error.message` from JSON bodies, otherwise falls back to a
/// lossy UTF-8 rendering capped at 500 chars.
#[must_use]
pub fn sanitize_upstream_error(body: &[u8]) -> String {
    const MAX_LEN: usize = 500;

    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        if let Some(msg) = json
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(Value::as_str)
        {
            return truncate_on_char_boundary(msg, MAX_LEN);
        }
    }

    let raw = String::from_utf8_lossy(body);
    truncate_on_char_boundary(&raw, MAX_LEN)
}

/// Render an error followed by every cause in its source chain.
///
/// Transport errors such as reqwest's only name the failing stage in their
/// own `Display`; the io cause sits further down the chain.
#[must_use]
pub fn describe_error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn truncate_on_char_boundary(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
