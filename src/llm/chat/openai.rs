use async_trait::async_trait;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;

use super::{ ChatClient, CompletionResponse };
use crate::llm::LlmConfig;

pub struct OpenAIChatClient {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    store: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "gpt-4o".to_string());
        let api_url = base_url.unwrap_or_else(|| "https://api.openai.com".to_string());
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .map_err(|e| format!("Invalid API key format: {}", e))?
        );

        let http = HttpClient::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            api_key,
            model: chat_model,
            base_url: api_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "OpenAI API key is required".to_string())?;

        Self::new(
            api_key,
            config.completion_model.clone(),
            config.base_url.clone(),
        )
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(
        &self,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));

        let messages = vec![OpenAIMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        }];

        let req = OpenAIChatRequest {
            model: self.model.clone(),
            messages,
            temperature: 1.0,
            max_completion_tokens: Some(2048),
            store: Some(false),
        };

        let resp = self.http.post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&req)
            .send()
            .await?
            .error_for_status()?
            .json::<OpenAIResponse>()
            .await?;

        let content = resp.choices.first()
            .ok_or_else(|| "No response from OpenAI API".to_string())?
            .message.content.clone();

        Ok(CompletionResponse { response: content })
    }

    fn model(&self) -> String {
        self.model.clone()
    }

    fn base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
