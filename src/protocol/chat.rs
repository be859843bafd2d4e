use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProxyError;

/// Conversation role of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "system" => Some(ChatRole::System),
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            _ => None,
        }
    }
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversation turn. Order within a conversation is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Inbound body of the coach chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoachChatRequest {
    pub messages: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
}

/// Decode and validate an inbound coach chat body.
///
/// # Errors
///
/// Returns [`ProxyError::InvalidInput`] when the body is not a JSON object,
/// `messages` is missing or not an array, an element is malformed, or
/// `system_prompt` is present but not a string.
pub fn decode_coach_chat_request(body: &[u8]) -> Result<CoachChatRequest, ProxyError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ProxyError::InvalidInput(format!("request body is not valid JSON: {e}")))?;
    let Value::Object(mut object) = value else {
        return Err(ProxyError::InvalidInput(
            "request body must be a JSON object".to_string(),
        ));
    };

    let messages = match object.remove("messages") {
        None | Some(Value::Null) => {
            return Err(ProxyError::InvalidInput("messages is required".to_string()))
        }
        Some(Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| decode_message(index, item))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ProxyError::InvalidInput(
                "messages must be an array".to_string(),
            ))
        }
    };

    let system_prompt = match object.remove("system_prompt") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(_) => {
            return Err(ProxyError::InvalidInput(
                "system_prompt must be a string".to_string(),
            ))
        }
    };

    Ok(CoachChatRequest {
        messages,
        system_prompt,
    })
}

fn decode_message(index: usize, item: Value) -> Result<ChatMessage, ProxyError> {
    let Value::Object(mut object) = item else {
        return Err(ProxyError::InvalidInput(format!(
            "messages[{index}] must be an object"
        )));
    };

    let role = match object.get("role") {
        Some(Value::String(raw)) => ChatRole::parse(raw).ok_or_else(|| {
            ProxyError::InvalidInput(format!("messages[{index}].role '{raw}' is not supported"))
        })?,
        _ => {
            return Err(ProxyError::InvalidInput(format!(
                "messages[{index}].role must be a string"
            )))
        }
    };

    let content = match object.remove("content") {
        Some(Value::String(text)) => text,
        _ => {
            return Err(ProxyError::InvalidInput(format!(
                "messages[{index}].content must be a string"
            )))
        }
    };

    Ok(ChatMessage { role, content })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_request() {
        let body = br#"{
            "messages": [
                {"role": "user", "content": "How should I price my mugs?"},
                {"role": "assistant", "content": "What do they cost you?"}
            ],
            "system_prompt": "You are a retail coach."
        }"#;
        let request = decode_coach_chat_request(body).unwrap();
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, ChatRole::User);
        assert_eq!(request.messages[1].content, "What do they cost you?");
        assert_eq!(
            request.system_prompt.as_deref(),
            Some("You are a retail coach.")
        );
    }

    #[test]
    fn test_missing_messages_is_invalid_input() {
        let err = decode_coach_chat_request(br#"{"system_prompt":"hi"}"#).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidInput(ref msg) if msg.contains("required")));
    }

    #[test]
    fn test_messages_not_a_list_is_invalid_input() {
        let err = decode_coach_chat_request(br#"{"messages":"hello"}"#).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidInput(ref msg) if msg.contains("array")));
    }

    #[test]
    fn test_non_object_body_is_invalid_input() {
        assert!(matches!(
            decode_coach_chat_request(b"[1,2,3]"),
            Err(ProxyError::InvalidInput(_))
        ));
        assert!(matches!(
            decode_coach_chat_request(b"not json"),
            Err(ProxyError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_unknown_role_rejected() {
        let err =
            decode_coach_chat_request(br#"{"messages":[{"role":"tool","content":"x"}]}"#)
                .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidInput(ref msg) if msg.contains("messages[0].role")));
    }

    #[test]
    fn test_null_content_rejected() {
        let err =
            decode_coach_chat_request(br#"{"messages":[{"role":"user","content":null}]}"#)
                .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidInput(ref msg) if msg.contains("content")));
    }

    #[test]
    fn test_null_system_prompt_is_absent() {
        let request = decode_coach_chat_request(
            br#"{"messages":[{"role":"user","content":"hi"}],"system_prompt":null}"#,
        )
        .unwrap();
        assert!(request.system_prompt.is_none());
    }

    #[test]
    fn test_empty_messages_decodes() {
        // Emptiness is rejected by the initiator, not the decoder.
        let request = decode_coach_chat_request(br#"{"messages":[]}"#).unwrap();
        assert!(request.messages.is_empty());
    }
}
