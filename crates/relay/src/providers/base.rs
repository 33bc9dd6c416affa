use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::errors::ProviderError;
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::stream::event::StreamAdapter;

/// Raw upstream bytes, exactly as they arrive from the network
pub type ByteStream = BoxStream<'static, Result<Bytes, ProviderError>>;

/// Everything a provider needs to open one streaming completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
    /// Model variant to use; the provider's configured default when absent
    pub model: Option<String>,
    pub deep_reasoning: bool,
}

/// Base trait for upstream model providers (Anthropic, OpenAI)
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// Open a streaming completion and hand back its byte stream.
    ///
    /// Failures before the first byte (bad status, missing credentials) are returned
    /// here; failures after that surface as errors inside the stream.
    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, ProviderError>;

    /// A fresh translator from this provider's wire records to provider events
    fn adapter(&self) -> Box<dyn StreamAdapter>;
}
