use async_trait::async_trait;
use log::error;
use redis::{ AsyncCommands, Client };
use std::error::Error;

use crate::cli::Args;
use crate::history::HistoryStore;
use crate::models::chat::{ ChatMessage, Conversation };

pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
}

impl RedisHistoryStore {
    pub fn new(args: Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        Ok(Self {
            client: Client::open(args.history_host.as_str())?,
            key_prefix: args.history_redis_prefix,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn key(&self, conversation_id: &str) -> String {
        format!("{}{}", self.key_prefix, conversation_id)
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn append_exchange(
        &self,
        conversation_id: &str,
        user: ChatMessage,
        assistant: ChatMessage
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let key = self.key(conversation_id);

        let user_json = serde_json::to_string(&user)?;
        let assistant_json = serde_json::to_string(&assistant)?;

        // MULTI/EXEC so a failed send never leaves half an exchange behind.
        let mut pipe = redis::pipe();
        pipe.atomic()
            .lpush(&key, &user_json).ignore()
            .lpush(&key, &assistant_json).ignore();
        let _: () = pipe.query_async(&mut conn).await?;

        Ok(())
    }

    async fn conversation(
        &self,
        conversation_id: &str
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        let mut conn = self.get_connection().await?;
        let key = self.key(conversation_id);
        let json_entries: Vec<String> = conn.lrange(&key, 0, -1).await?;
        let mut messages = Vec::new();

        for json_entry in &json_entries {
            match serde_json::from_str::<ChatMessage>(json_entry) {
                Ok(msg) => messages.push(msg),
                Err(e) => {
                    error!("Error parsing history entry: {}", e);
                }
            }
        }
        // LPUSH keeps newest first; callers get oldest first.
        messages.reverse();

        Ok(Conversation {
            id: conversation_id.to_string(),
            messages,
        })
    }
}
