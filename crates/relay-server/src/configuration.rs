use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use relay::collaborators::images::{ImageProviderConfig, DEFAULT_IMAGE_MODEL, OPENAI_IMAGES_HOST};
use relay::providers::configs::{
    AnthropicProviderConfig, OpenAiProviderConfig, ProviderConfig, ANTHROPIC_HOST,
    ANTHROPIC_MODEL, OPENAI_HOST, OPENAI_MODEL,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                env_var: to_env_var("server.host"),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Deserialize)]
pub struct AnthropicSettings {
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    pub max_tokens: i32,
    pub thinking_budget: i32,
}

impl AnthropicSettings {
    pub fn into_config(self) -> ProviderConfig {
        ProviderConfig::Anthropic(AnthropicProviderConfig {
            host: self.host,
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
            thinking_budget: self.thinking_budget,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct OpenAiSettings {
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

impl OpenAiSettings {
    pub fn into_config(self) -> ProviderConfig {
        ProviderConfig::OpenAi(OpenAiProviderConfig {
            host: self.host,
            api_key: self.api_key,
            model: self.model,
            max_tokens: self.max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ImageSettings {
    pub host: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
}

impl ImageSettings {
    /// `None` when no key is set, in which case image tools report themselves unavailable
    pub fn config(&self) -> Option<ImageProviderConfig> {
        self.api_key.as_ref().map(|api_key| ImageProviderConfig {
            host: self.host.clone(),
            api_key: api_key.clone(),
            model: self.model.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct StorageSettings {
    pub dir: PathBuf,
    pub public_base_url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PdfSettings {
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub tokens: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub anthropic: AnthropicSettings,
    pub openai: OpenAiSettings,
    pub images: ImageSettings,
    pub storage: StorageSettings,
    #[serde(default)]
    pub pdf: PdfSettings,
    #[serde(default)]
    pub auth: AuthSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // Start with default configuration
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Provider defaults
            .set_default("anthropic.host", ANTHROPIC_HOST)?
            .set_default("anthropic.model", ANTHROPIC_MODEL)?
            .set_default("anthropic.max_tokens", 8192)?
            .set_default("anthropic.thinking_budget", 10_000)?
            .set_default("openai.host", OPENAI_HOST)?
            .set_default("openai.model", OPENAI_MODEL)?
            // Collaborator defaults
            .set_default("images.host", OPENAI_IMAGES_HOST)?
            .set_default("images.model", DEFAULT_IMAGE_MODEL)?
            .set_default("storage.dir", "./assets")?
            .set_default(
                "storage.public_base_url",
                format!("http://{}:{}/assets", default_host(), default_port()),
            )?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("RELAY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Try to deserialize the configuration
        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Handle missing field errors specially
        let settings = match result {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);
                return Err(classify(err));
            }
        };

        // Without any token every turn would be rejected
        if settings
            .auth
            .tokens
            .as_deref()
            .map_or(true, |t| t.trim().is_empty())
        {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("auth.tokens"),
            });
        }

        Ok(settings)
    }
}

fn classify(err: config::ConfigError) -> ConfigError {
    // Handle both NotFound and missing field message variants
    let error_str = err.to_string();
    if error_str.starts_with("missing field") {
        // Extract field name from error message "missing field `type`"
        let field = error_str
            .trim_start_matches("missing field `")
            .trim_end_matches('`');
        ConfigError::MissingEnvVar {
            env_var: to_env_var(field),
        }
    } else if let config::ConfigError::NotFound(field) = &err {
        ConfigError::MissingEnvVar {
            env_var: to_env_var(field),
        }
    } else {
        ConfigError::Other(err)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}
