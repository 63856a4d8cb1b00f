pub mod chat;

use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    Ollama,
    OpenAI,
    Groq,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLlmTypeError {
    message: String,
}

impl fmt::Display for ParseLlmTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLlmTypeError {}

impl FromStr for LlmType {
    type Err = ParseLlmTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(LlmType::Ollama),
            "openai" => Ok(LlmType::OpenAI),
            "groq" => Ok(LlmType::Groq),
            _ =>
                Err(ParseLlmTypeError {
                    message: format!("Invalid LLM type: '{}'", s),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            llm_type: LlmType::Ollama,
            api_key: None,
            completion_model: None,
            base_url: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_type_parses_case_insensitively() {
        assert_eq!("openai".parse::<LlmType>().unwrap(), LlmType::OpenAI);
        assert_eq!("OLLAMA".parse::<LlmType>().unwrap(), LlmType::Ollama);
        assert_eq!("Groq".parse::<LlmType>().unwrap(), LlmType::Groq);
    }

    #[test]
    fn unknown_llm_type_is_an_error() {
        let err = "palm".parse::<LlmType>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid LLM type: 'palm'");
    }
}
