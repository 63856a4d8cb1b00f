use serde::{ Serialize, Deserialize };

use super::chat::ChatMessage;
use super::relay::Envelope;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        source: String,
        content: String,
        chat_id: Option<String>,
    },
    #[serde(rename = "history")] History {
        chat_id: Option<String>,
    },
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "response")] Response {
        #[serde(flatten)]
        envelope: Envelope,
    },
    #[serde(rename = "history")] History {
        chat_id: String,
        messages: Vec<ChatMessage>,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
}
