use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- History Store Args ---
    /// History store type (memory, redis)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory")]
    pub history_type: String,

    /// History store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "history:")]
    pub history_redis_prefix: String,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (ollama, openai, groq)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "ollama")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API (e.g., http://localhost:11434 for Ollama)
    #[arg(long, env = "CHAT_BASE_URL")] // No default, let adapters handle defaults if None
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider (e.g., OpenAI, Groq)
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., gpt-4o, llama3)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on adapter defaults if None
    pub chat_model: Option<String>,

    // --- Server Args ---
    /// Host address and port for the WebSocket server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Port for the HTTP API server. The HTTP API is disabled when unset.
    #[arg(long, env = "HTTP_PORT")]
    pub http_port: Option<u16>,

    /// Optional API Key required for clients to connect to the WebSocket server. If set, clients must provide this key.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Optional path to the TLS certificate file (PEM format) for enabling WSS/HTTPS. Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling WSS/HTTPS. Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

#[cfg(test)]
impl Args {
    /// Defaults without touching the process environment.
    pub fn for_tests() -> Self {
        Self {
            history_type: "memory".into(),
            history_host: "redis://127.0.0.1:6379".into(),
            history_redis_prefix: "history:".into(),
            chat_llm_type: "ollama".into(),
            chat_base_url: None,
            chat_api_key: String::new(),
            chat_model: None,
            server_addr: "127.0.0.1:4000".into(),
            http_port: None,
            server_api_key: None,
            tls_cert_path: None,
            tls_key_path: None,
            enable_tls: false,
        }
    }
}
