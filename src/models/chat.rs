use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
    }

    #[test]
    fn message_timestamp_is_rfc3339() {
        let msg = ChatMessage::new(Role::User, "Hi");
        let value: serde_json::Value = serde_json::from_str(
            &serde_json::to_string(&msg).unwrap()
        ).unwrap();
        let raw = value["timestamp"].as_str().expect("timestamp should be a string");
        assert!(DateTime::parse_from_rfc3339(raw).is_ok(), "not RFC 3339: {}", raw);
    }

    #[test]
    fn message_round_trips() {
        let msg = ChatMessage::new(Role::Assistant, "Hello!");
        let parsed: ChatMessage = serde_json::from_str(
            &serde_json::to_string(&msg).unwrap()
        ).unwrap();
        assert_eq!(parsed.role, Role::Assistant);
        assert_eq!(parsed.content, "Hello!");
        assert_eq!(parsed.timestamp, msg.timestamp);
    }
}
