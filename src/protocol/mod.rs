pub mod chat;
pub mod openai_chat;

pub use chat::{decode_coach_chat_request, ChatMessage, ChatRole, CoachChatRequest};
