use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use tokio::sync::RwLock;

use crate::history::HistoryStore;
use crate::models::chat::{ ChatMessage, Conversation };

/// In-process history store. The default backend, and the one tests inject.
pub struct MemoryHistoryStore {
    conversations: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn append_exchange(
        &self,
        conversation_id: &str,
        user: ChatMessage,
        assistant: ChatMessage
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conversations = self.conversations.write().await;
        let messages = conversations.entry(conversation_id.to_string()).or_default();
        messages.push(user);
        messages.push(assistant);
        Ok(())
    }

    async fn conversation(
        &self,
        conversation_id: &str
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        let conversations = self.conversations.read().await;
        let messages = conversations.get(conversation_id).cloned().unwrap_or_default();

        Ok(Conversation {
            id: conversation_id.to_string(),
            messages,
        })
    }
}
