//! Wire types for the upstream chat-completions API.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::chat::{ChatMessage, ChatRole};
use crate::error::ProxyError;

/// Fixed decoding policy sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<WireMessage<'a>>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WireMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

/// Build the streaming completion request body.
///
/// Output order: the system directive (if any), then caller-supplied system
/// messages, then every other message in caller order.
#[must_use]
pub fn build_completion_request<'a>(
    model: &'a str,
    params: DecodingParams,
    system_directive: Option<&'a str>,
    messages: &'a [ChatMessage],
) -> CompletionRequest<'a> {
    let mut wire = Vec::with_capacity(messages.len() + usize::from(system_directive.is_some()));

    if let Some(directive) = system_directive {
        wire.push(WireMessage {
            role: ChatRole::System.as_str(),
            content: directive,
        });
    }
    let (system, conversation): (Vec<&ChatMessage>, Vec<&ChatMessage>) = messages
        .iter()
        .partition(|message| message.role == ChatRole::System);
    wire.extend(system.into_iter().chain(conversation).map(|message| WireMessage {
        role: message.role.as_str(),
        content: &message.content,
    }));

    CompletionRequest {
        model,
        messages: wire,
        temperature: params.temperature,
        max_tokens: params.max_tokens,
        stream: true,
    }
}

/// Serialize a completion request into the outbound body bytes.
///
/// # Errors
///
/// Returns [`ProxyError::Internal`] if serialization fails.
pub fn encode_completion_request(request: &CompletionRequest<'_>) -> Result<bytes::Bytes, ProxyError> {
    serde_json::to_vec(request)
        .map(bytes::Bytes::from)
        .map_err(|e| ProxyError::Internal(format!("Failed to encode completion request: {e}")))
}

/// One incremental chunk of a streamed completion.
#[derive(Debug, Default, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamChunk {
    /// The first choice's incremental text, if present and non-empty.
    #[must_use]
    pub fn into_first_delta(self) -> Option<String> {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty())
    }
}
