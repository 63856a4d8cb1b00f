pub mod ollama;
pub mod openai;
pub mod groq;

use async_trait::async_trait;
use serde::Deserialize;
use std::error::Error as StdError;
use std::sync::Arc;

use super::{ LlmConfig, LlmType };
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use self::groq::GroqChatClient;

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

/// Completion provider seam. The relay only ever sees this trait, so tests
/// inject a mock and never touch the network.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>>;

    fn model(&self) -> String;
    fn base_url(&self) -> Option<String>;
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Groq => {
            let specific_client = GroqChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_requires_an_api_key() {
        let config = LlmConfig {
            llm_type: LlmType::OpenAI,
            ..LlmConfig::default()
        };
        assert!(new_client(&config).is_err());
    }

    #[test]
    fn ollama_builds_without_credentials() {
        let client = new_client(&LlmConfig::default()).unwrap();
        assert_eq!(client.base_url().as_deref(), Some("http://localhost:11434"));
    }
}
