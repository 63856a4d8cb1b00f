use crate::cli::Args;
use crate::error::RelayError;
use crate::history::{ initialize_history_store, HistoryStore };
use crate::llm::LlmConfig;
use crate::llm::chat::{ new_client as new_chat_client, ChatClient };
use crate::models::chat::{ ChatMessage, Role };
use crate::models::relay::{ Envelope, Source };

use log::{ error, info, warn };
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Conversation id used when a caller supplies none.
pub const DEFAULT_CHAT_ID: &str = "default";

/// Request/response relay between UI surfaces and a completion provider.
/// Provider and history store are injected traits; the relay owns nothing
/// but the per-conversation serialization locks.
pub struct Relay {
    chat_client: Arc<dyn ChatClient>,
    history_store: Arc<dyn HistoryStore>,
    conversation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Relay {
    pub fn new(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let chat_config = LlmConfig {
            llm_type: args.chat_llm_type.parse()?,
            api_key: Some(args.chat_api_key.clone()).filter(|k| !k.is_empty()),
            completion_model: args.chat_model.clone(),
            base_url: args.chat_base_url.clone(),
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, Model={}, BaseURL={:?}",
            args.chat_llm_type,
            chat_client.model(),
            chat_client.base_url()
        );

        let history_store = initialize_history_store(args)?;

        Ok(Self::with_parts(chat_client, history_store))
    }

    pub fn with_parts(
        chat_client: Arc<dyn ChatClient>,
        history_store: Arc<dyn HistoryStore>
    ) -> Self {
        Self {
            chat_client,
            history_store,
            conversation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Forwards `content` to the provider and records the exchange. Never
    /// fails outward: every outcome is an envelope carrying the supplied
    /// chat id (or the default).
    pub async fn send_message(
        &self,
        content: &str,
        chat_id: Option<&str>,
        source: Source
    ) -> Envelope {
        let conversation_id = chat_id.unwrap_or(DEFAULT_CHAT_ID).to_string();

        match self.relay_exchange(&conversation_id, content, source).await {
            Ok(reply) => Envelope::success(conversation_id, reply),
            Err(err) => {
                if err.is_validation() {
                    warn!("Rejected {} request for conversation {}: {}", source, conversation_id, err);
                } else {
                    error!("Relay failed for conversation {}: {}", conversation_id, err);
                }
                Envelope::failure(conversation_id, err.to_string())
            }
        }
    }

    /// Ordered messages for a conversation, oldest first. Unknown ids are
    /// empty, not errors.
    pub async fn get_history(
        &self,
        chat_id: &str
    ) -> Result<Vec<ChatMessage>, Box<dyn Error + Send + Sync>> {
        let conversation = self.history_store.conversation(chat_id).await?;
        Ok(conversation.messages)
    }

    async fn relay_exchange(
        &self,
        conversation_id: &str,
        content: &str,
        source: Source
    ) -> Result<String, RelayError> {
        if content.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }

        info!("Relaying {} message for conversation {}", source, conversation_id);

        // Held across the provider round trip so concurrent sends to one
        // conversation cannot interleave their exchanges.
        let lock = self.conversation_lock(conversation_id).await;
        let _guard = lock.lock().await;

        let completion = self.chat_client
            .complete(content).await
            .map_err(|e| RelayError::Provider(e.to_string()))?;

        let user = ChatMessage::new(Role::User, content);
        let assistant = ChatMessage::new(Role::Assistant, completion.response.clone());
        self.history_store
            .append_exchange(conversation_id, user, assistant).await
            .map_err(|e| RelayError::Store(e.to_string()))?;

        Ok(completion.response)
    }

    async fn conversation_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.conversation_locks.lock().await;
        locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::memory::MemoryHistoryStore;
    use crate::llm::chat::CompletionResponse;
    use crate::models::relay::Status;
    use async_trait::async_trait;
    use std::error::Error as StdError;
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use std::time::Duration;

    struct FixedReplyClient {
        reply: String,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl FixedReplyClient {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
                delay: None,
            }
        }

        fn slow(reply: &str, delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new(reply)
            }
        }
    }

    #[async_trait]
    impl ChatClient for FixedReplyClient {
        async fn complete(
            &self,
            _prompt: &str
        ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(CompletionResponse { response: self.reply.clone() })
        }

        fn model(&self) -> String {
            "fixed".to_string()
        }

        fn base_url(&self) -> Option<String> {
            None
        }
    }

    struct FailingClient {
        message: String,
    }

    #[async_trait]
    impl ChatClient for FailingClient {
        async fn complete(
            &self,
            _prompt: &str
        ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
            Err(self.message.clone().into())
        }

        fn model(&self) -> String {
            "failing".to_string()
        }

        fn base_url(&self) -> Option<String> {
            None
        }
    }

    fn relay_with(client: Arc<dyn ChatClient>) -> Relay {
        Relay::with_parts(client, Arc::new(MemoryHistoryStore::new()))
    }

    #[tokio::test]
    async fn successful_send_returns_success_envelope_with_default_chat_id() {
        let relay = relay_with(Arc::new(FixedReplyClient::new("Hello!")));
        let envelope = relay.send_message("Hi", None, Source::Vscode).await;

        assert_eq!(envelope.status, Status::Success);
        assert_eq!(envelope.response.as_deref(), Some("Hello!"));
        assert_eq!(envelope.chat_id, DEFAULT_CHAT_ID);
        assert!(envelope.error.is_none());
    }

    #[tokio::test]
    async fn successful_send_appends_user_then_assistant() {
        let relay = relay_with(Arc::new(FixedReplyClient::new("Hello!")));
        relay.send_message("Hi", Some("c1"), Source::React).await;

        let messages = relay.get_history("c1").await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello!");
    }

    #[tokio::test]
    async fn supplied_chat_id_is_echoed() {
        let relay = relay_with(Arc::new(FixedReplyClient::new("Response from VSCode")));
        let envelope = relay
            .send_message("Hello from VSCode", Some("vscode-123"), Source::Vscode).await;

        assert_eq!(envelope.status, Status::Success);
        assert_eq!(envelope.chat_id, "vscode-123");
    }

    #[tokio::test]
    async fn unknown_chat_id_has_empty_history() {
        let relay = relay_with(Arc::new(FixedReplyClient::new("Hello!")));
        let messages = relay.get_history("never-seen").await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn provider_failure_yields_error_envelope_and_no_history() {
        let relay = relay_with(Arc::new(FailingClient { message: "API Error".into() }));
        let envelope = relay.send_message("Hi", Some("c1"), Source::Vscode).await;

        assert_eq!(envelope.status, Status::Error);
        assert_eq!(envelope.error.as_deref(), Some("API Error"));
        assert!(envelope.response.is_none());
        assert_eq!(envelope.chat_id, "c1");
        assert!(relay.get_history("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_message_is_rejected_before_the_provider_call() {
        let client = Arc::new(FixedReplyClient::new("Hello!"));
        let relay = relay_with(client.clone());
        let envelope = relay.send_message("   ", Some("c1"), Source::React).await;

        assert_eq!(envelope.status, Status::Error);
        assert_eq!(envelope.error.as_deref(), Some("Empty message"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert!(relay.get_history("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_sends_accumulate_chronological_history() {
        let relay = relay_with(Arc::new(FixedReplyClient::new("ack")));
        for i in 0..3 {
            let envelope = relay
                .send_message(&format!("message {}", i), Some("c1"), Source::React).await;
            assert_eq!(envelope.status, Status::Success);
        }

        let messages = relay.get_history("c1").await.unwrap();
        assert_eq!(messages.len(), 6);
        for (i, pair) in messages.chunks(2).enumerate() {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[0].content, format!("message {}", i));
            assert_eq!(pair[1].role, Role::Assistant);
        }
        for window in messages.windows(2) {
            assert!(window[0].timestamp <= window[1].timestamp);
        }
    }

    #[tokio::test]
    async fn concurrent_sends_to_one_conversation_do_not_interleave() {
        let client = Arc::new(FixedReplyClient::slow("ack", Duration::from_millis(5)));
        let relay = Arc::new(relay_with(client));

        let mut handles = Vec::new();
        for i in 0..4 {
            let relay = relay.clone();
            handles.push(tokio::spawn(async move {
                relay.send_message(&format!("m{}", i), Some("shared"), Source::React).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().status, Status::Success);
        }

        let messages = relay.get_history("shared").await.unwrap();
        assert_eq!(messages.len(), 8);
        for pair in messages.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }

    #[tokio::test]
    async fn relay_builds_from_default_config() {
        let relay = Relay::new(&Args::for_tests()).unwrap();
        assert!(relay.get_history("never-seen").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversations_do_not_share_history() {
        let relay = relay_with(Arc::new(FixedReplyClient::new("ack")));
        relay.send_message("one", Some("a"), Source::Vscode).await;
        relay.send_message("two", Some("b"), Source::React).await;

        assert_eq!(relay.get_history("a").await.unwrap().len(), 2);
        assert_eq!(relay.get_history("b").await.unwrap().len(), 2);
    }
}
