//! Opens streaming completion calls against the configured provider.
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};

use crate::config::ProviderConfig;
use crate::error::{describe_error_chain, sanitize_upstream_error, ProxyError};
use crate::protocol::chat::ChatMessage;
use crate::protocol::openai_chat::{
    build_completion_request, encode_completion_request, DecodingParams,
};
use crate::transport::HttpTransport;

/// Upper bound on how much of a rejected call's body is read for diagnostics.
const ERROR_BODY_LIMIT_BYTES: usize = 8 * 1024;

/// Live upstream response body, yielding network reads as they arrive.
pub type UpstreamBody = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// An upstream call whose headers arrived with a success status.
pub struct UpstreamStream {
    pub status: http::StatusCode,
    pub body: UpstreamBody,
}

impl std::fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStream")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Builds completion requests and opens the upstream stream.
///
/// Holds the provider configuration read at start-up; nothing in here is
/// mutated after construction.
#[derive(Debug, Clone)]
pub struct CompletionInitiator {
    provider: ProviderConfig,
    completions_url: String,
    transport: HttpTransport,
}

impl CompletionInitiator {
    #[must_use]
    pub fn new(provider: ProviderConfig, transport: HttpTransport) -> Self {
        let completions_url = provider.completions_url();
        Self {
            provider,
            completions_url,
            transport,
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.provider.model
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.provider.credential().is_some()
    }

    fn decoding_params(&self) -> DecodingParams {
        DecodingParams {
            temperature: self.provider.temperature,
            max_tokens: self.provider.max_tokens,
        }
    }

    /// Issue one streaming completion request and return as soon as response
    /// headers are available.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::InvalidInput`] when `messages` is empty.
    /// - [`ProxyError::NotConfigured`] when no provider credential is set.
    /// - [`ProxyError::UpstreamUnavailable`] on connection failure.
    /// - [`ProxyError::UpstreamRejected`] when upstream answers with a
    ///   non-success status; its body is read and sanitised for diagnostics.
    ///
    /// The first two are detected before any network activity.
    pub async fn open_stream(
        &self,
        messages: &[ChatMessage],
        system_directive: Option<&str>,
    ) -> Result<UpstreamStream, ProxyError> {
        if messages.is_empty() {
            return Err(ProxyError::InvalidInput(
                "messages must contain at least one message".to_string(),
            ));
        }
        let Some(credential) = self.provider.credential() else {
            return Err(ProxyError::NotConfigured(
                "provider credential is not configured".to_string(),
            ));
        };

        let request = build_completion_request(
            &self.provider.model,
            self.decoding_params(),
            system_directive,
            messages,
        );
        let body = encode_completion_request(&request)?;
        let headers = build_headers(credential)?;

        tracing::debug!(
            model = %self.provider.model,
            message_count = request.messages.len(),
            "opening upstream completion stream"
        );
        let response = self
            .transport
            .send_stream(&self.completions_url, headers, body)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_bytes =
                read_error_body(response.bytes_stream(), ERROR_BODY_LIMIT_BYTES).await;
            return Err(ProxyError::UpstreamRejected {
                status: status.as_u16(),
                message: sanitize_upstream_error(&body_bytes),
            });
        }

        Ok(UpstreamStream {
            status,
            body: response.bytes_stream().boxed(),
        })
    }
}

/// Collect at most `limit` bytes of an error body. A read failure keeps
/// whatever arrived before it.
async fn read_error_body<S, E>(body: S, limit: usize) -> Bytes
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::error::Error,
{
    let mut body = std::pin::pin!(body);
    let mut collected = BytesMut::new();
    while collected.len() < limit {
        match body.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(limit - collected.len());
                collected.extend_from_slice(&chunk[..take]);
            }
            Some(Err(err)) => {
                tracing::debug!(
                    error = %describe_error_chain(&err),
                    read_bytes = collected.len(),
                    "failed to read upstream error body"
                );
                break;
            }
            None => break,
        }
    }
    collected.freeze()
}

fn build_headers(credential: &str) -> Result<http::HeaderMap, ProxyError> {
    let mut headers = http::HeaderMap::with_capacity(3);
    let mut authorization = http::HeaderValue::from_str(&format!("Bearer {credential}"))
        .map_err(|_| {
            ProxyError::NotConfigured(
                "provider credential contains characters not allowed in a header".to_string(),
            )
        })?;
    authorization.set_sensitive(true);
    headers.insert(http::header::AUTHORIZATION, authorization);
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    headers.insert(
        http::header::ACCEPT,
        http::HeaderValue::from_static("text/event-stream"),
    );
    Ok(headers)
}
