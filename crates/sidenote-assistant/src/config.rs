use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    pub backend: BackendConfig,
    pub chat: ChatConfig,
}

/// Completion endpoint settings (OpenAI-compatible chat completions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// Ask the endpoint for SSE streaming; off for providers without it.
    pub streaming: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Conversation turns included in each prompt.
    pub history_turns: usize,
    /// Stored page conversations kept before LRU eviction.
    pub max_pages: usize,
    /// Per-page message cap; older messages are trimmed first.
    pub max_messages_per_page: usize,
    /// Lifetime of a pending context handoff.
    pub pending_ttl_secs: u64,
    /// Character budget for tagged page text inside the system prompt.
    pub context_char_budget: usize,
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.backend.endpoint.is_empty() {
            return Err("backend.endpoint must not be empty".into());
        }
        if self.backend.max_tokens == 0 {
            return Err("backend.max_tokens must be > 0".into());
        }
        if !(0.0..=2.0).contains(&self.backend.temperature) {
            return Err("backend.temperature must be in [0.0, 2.0]".into());
        }
        if self.chat.history_turns == 0 {
            return Err("chat.history_turns must be > 0".into());
        }
        if self.chat.max_pages == 0 {
            return Err("chat.max_pages must be > 0".into());
        }
        if self.chat.max_messages_per_page < 2 {
            return Err("chat.max_messages_per_page must be >= 2".into());
        }
        Ok(())
    }

    /// Load from a JSON file, validating before use.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sidenote");
        Self {
            data_dir,
            backend: BackendConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "llama3.2".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            connect_timeout_secs: 15,
            request_timeout_secs: 120,
            streaming: true,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_turns: 10,
            max_pages: 128,
            max_messages_per_page: 200,
            pending_ttl_secs: 300,
            context_char_budget: 12_000,
        }
    }
}
