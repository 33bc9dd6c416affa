use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Invalid value for {env_var}: {reason}")]
    InvalidValue { env_var: String, reason: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

// Helper function to format environment variable names
pub(crate) fn to_env_var(field_path: &str) -> String {
    // Handle nested fields by converting dots to double underscores
    format!("RELAY_{}", field_path.replace('.', "__").to_uppercase())
}
