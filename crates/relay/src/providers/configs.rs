pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_MODEL: &str = "claude-sonnet-4-20250514";
pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o";

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    Anthropic(AnthropicProviderConfig),
    OpenAi(OpenAiProviderConfig),
}

#[derive(Debug, Clone)]
pub struct AnthropicProviderConfig {
    pub host: String,
    /// A provider without a key still routes; its turns fail with missing credentials
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: i32,
    pub thinking_budget: i32,
}

impl Default for AnthropicProviderConfig {
    fn default() -> Self {
        Self {
            host: ANTHROPIC_HOST.to_string(),
            api_key: None,
            model: ANTHROPIC_MODEL.to_string(),
            max_tokens: 8192,
            thinking_budget: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: Option<i32>,
}

impl Default for OpenAiProviderConfig {
    fn default() -> Self {
        Self {
            host: OPENAI_HOST.to_string(),
            api_key: None,
            model: OPENAI_MODEL.to_string(),
            max_tokens: None,
        }
    }
}
