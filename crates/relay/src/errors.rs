use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised while talking to an upstream model provider.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Missing credentials for {0}")]
    MissingCredentials(String),

    #[error("Rate limited by upstream provider: {0}")]
    RateLimited(String),

    #[error("Upstream provider is overloaded: {0}")]
    Overloaded(String),

    #[error("Upstream provider rejected credentials: {0}")]
    Unauthorized(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

impl ProviderError {
    /// Classify a non-success HTTP status returned by a provider.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        let detail = if body.is_empty() {
            status.to_string()
        } else {
            format!("{} - {}", status, body)
        };
        match status.as_u16() {
            429 => ProviderError::RateLimited(detail),
            503 | 529 => ProviderError::Overloaded(detail),
            401 | 403 => ProviderError::Unauthorized(detail),
            500..=599 => ProviderError::Upstream(detail),
            _ => ProviderError::InvalidRequest(detail),
        }
    }

    /// Whether the client should offer the user's message for resubmission.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::Overloaded(_)
                | ProviderError::Upstream(_)
                | ProviderError::Transport(_)
        )
    }
}

/// Errors raised while resolving the caller of a turn.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    /// The token is absent or not recognised
    #[error("Unauthenticated")]
    Unauthenticated,

    /// The token was accepted but the caller's profile could not be loaded. Resolvers
    /// backed by a profile store report outages this way.
    #[error("Profile lookup failed: {0}")]
    ProfileLookup(String),
}

/// Errors raised by a single tool invocation against its collaborator.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("{0} is not configured")]
    Unavailable(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),

    #[error("Tool panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Why a closed tool block could not become a tool invocation.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("tool block {index} has no tool name")]
    MissingName { index: u32 },

    #[error("tool block {index} arguments are not valid JSON: {source}")]
    InvalidJson {
        index: u32,
        #[source]
        source: serde_json::Error,
    },

    #[error("tool block {index} arguments are not a JSON object")]
    NotAnObject { index: u32 },
}
