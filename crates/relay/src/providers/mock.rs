use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use std::sync::Mutex;

use super::anthropic::AnthropicAdapter;
use super::openai::OpenAiAdapter;
use crate::errors::ProviderError;
use crate::providers::base::{ByteStream, CompletionRequest, Provider};
use crate::stream::event::StreamAdapter;

enum Script {
    Chunks {
        chunks: Vec<Bytes>,
        /// Cut the stream with a transport-style failure after the chunks
        reset: bool,
    },
    Status(StatusCode, String),
}

/// A mock provider that replays a scripted upstream byte stream for testing
pub struct MockProvider {
    name: &'static str,
    script: Script,
    adapter: fn() -> Box<dyn StreamAdapter>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    /// Replays Anthropic-format chunks exactly as split here
    pub fn anthropic<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        Self::scripted("anthropic", chunks, || Box::new(AnthropicAdapter))
    }

    /// Replays OpenAI-format chunks exactly as split here
    pub fn openai<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        Self::scripted("openai", chunks, || Box::new(OpenAiAdapter::default()))
    }

    /// Fails before streaming with the given upstream status
    pub fn failing(status: u16, body: &str) -> Self {
        Self {
            name: "anthropic",
            script: Script::Status(
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                body.to_string(),
            ),
            adapter: || Box::new(AnthropicAdapter),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Ends the stream with a connection failure instead of a clean close
    pub fn with_reset(mut self) -> Self {
        if let Script::Chunks { reset, .. } = &mut self.script {
            *reset = true;
        }
        self
    }

    /// Every request this provider was asked to stream
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn scripted<I, C>(name: &'static str, chunks: I, adapter: fn() -> Box<dyn StreamAdapter>) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Bytes>,
    {
        Self {
            name,
            script: Script::Chunks {
                chunks: chunks.into_iter().map(Into::into).collect(),
                reset: false,
            },
            adapter,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.script {
            Script::Status(status, body) => Err(ProviderError::from_status(*status, body.clone())),
            Script::Chunks { chunks, reset } => {
                let mut items: Vec<Result<Bytes, ProviderError>> =
                    chunks.iter().cloned().map(Ok).collect();
                if *reset {
                    items.push(Err(ProviderError::Upstream("connection reset".to_string())));
                }
                Ok(Box::pin(futures::stream::iter(items)))
            }
        }
    }

    fn adapter(&self) -> Box<dyn StreamAdapter> {
        (self.adapter)()
    }
}
