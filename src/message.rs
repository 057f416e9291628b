use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder content shown while an assistant message exists but no real
/// fragment has arrived yet. Treated as empty by the merge reducer.
pub const PLACEHOLDER: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: format!("{}-{}-message", Uuid::new_v4(), role.as_str()),
            role,
            content: content.into(),
        }
    }
}

/// Fold one arriving text fragment into the message list.
///
/// If the trailing message has the same role, the fragment is appended to it
/// (a placeholder counts as empty, so the first real fragment replaces it).
/// Otherwise a new message is started. Append-only by position: existing
/// messages are never reordered or overwritten.
pub fn merge_fragment(messages: &mut Vec<Message>, role: Role, fragment: &str) {
    match messages.last_mut() {
        Some(last) if last.role == role => {
            if last.content == PLACEHOLDER {
                last.content = fragment.to_string();
            } else {
                last.content.push_str(fragment);
            }
        }
        _ => messages.push(Message::new(role, fragment)),
    }
}
