use std::time::Duration;

use crate::config::{ProviderConfig, ServerConfig};
use crate::error::{describe_error_chain, ProxyError};

fn build_reqwest_client(
    server: &ServerConfig,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, ProxyError> {
    let pool_idle_timeout = if server.http_pool_idle_timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(server.http_pool_idle_timeout_secs))
    };

    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(server.http_pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(server.connect_timeout))
        .redirect(reqwest::redirect::Policy::none());

    // Idle limit between reads; a long stream that keeps producing is never cut.
    if server.read_timeout > 0 {
        builder = builder.read_timeout(Duration::from_secs(server.read_timeout));
    }

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ProxyError::Internal(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !server.http_use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ProxyError::Internal(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client used for upstream completion calls.
///
/// Requests are sent exactly once; there is no retry layer.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a pooled client from the server settings and the provider's
    /// optional outbound proxy.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] when the proxy URL is invalid or the
    /// client cannot be constructed.
    pub fn new(server: &ServerConfig, provider: &ProviderConfig) -> Result<Self, ProxyError> {
        let client = build_reqwest_client(server, provider.proxy.as_deref())?;
        Ok(Self { client })
    }

    /// Send a request whose response body will be read as a stream.
    ///
    /// Resolves once response headers are available; the body is left unread.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::UpstreamUnavailable`] when the connection cannot
    /// be established or the request cannot be sent.
    pub async fn send_stream(
        &self,
        url: &str,
        headers: http::HeaderMap,
        body: bytes::Bytes,
    ) -> Result<reqwest::Response, ProxyError> {
        self.client
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|err| ProxyError::UpstreamUnavailable(describe_send_error(&err)))
    }
}

fn describe_send_error(err: &reqwest::Error) -> String {
    let kind = if err.is_timeout() {
        "timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    format!("{kind}: {}", describe_error_chain(err))
}
