pub(crate) mod coach_chat;
pub(crate) mod health;
