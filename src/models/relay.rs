use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;
use super::chat::ChatMessage;

/// Calling surface tag. Selects nothing but the log line; every surface gets
/// the same envelope shape back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Vscode,
    React,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Vscode => write!(f, "vscode"),
            Source::React => write!(f, "react"),
        }
    }
}

impl FromStr for Source {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vscode" => Ok(Source::Vscode),
            "react" => Ok(Source::React),
            other => Err(RelayError::InvalidSource(other.to_string())),
        }
    }
}

/// Inbound chat request, shared by the HTTP API and the WebSocket transport.
/// `source` stays a plain string here so an unknown value surfaces as a
/// validation envelope rather than a deserialization failure.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub source: String,
    pub message: String,
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub chat_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub chat_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Normalized reply returned to every caller. Exactly one of `response` and
/// `error` is present, matching `status`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub chat_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn success(chat_id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            response: Some(response.into()),
            chat_id: chat_id.into(),
            timestamp: Utc::now(),
            status: Status::Success,
            error: None,
        }
    }

    pub fn failure(chat_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            response: None,
            chat_id: chat_id.into(),
            timestamp: Utc::now(),
            status: Status::Error,
            error: Some(error.into()),
        }
    }
}
