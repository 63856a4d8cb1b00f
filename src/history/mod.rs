pub mod memory;
mod redis;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;

use crate::cli::Args;
use crate::models::chat::{ ChatMessage, Conversation };

/// Per-conversation message log. `append_exchange` is atomic: either both
/// messages of an exchange land or neither does.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_exchange(
        &self,
        conversation_id: &str,
        user: ChatMessage,
        assistant: ChatMessage
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Oldest-first. Unknown ids yield an empty conversation, not an error.
    async fn conversation(
        &self,
        conversation_id: &str
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>>;
}

pub fn create_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(memory::MemoryHistoryStore::new())),
        "redis" => {
            let store = redis::RedisHistoryStore::new(args.clone())?;
            Ok(Arc::new(store))
        }
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Arc<dyn HistoryStore>, Box<dyn Error + Send + Sync>> {
    if args.history_type.to_lowercase() == "memory" {
        info!("Chat history will be kept in process memory");
    } else {
        info!("Chat history will be stored in: {} at {}", args.history_type, args.history_host);
    }
    create_history_store(args)
}
