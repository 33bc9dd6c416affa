use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{ByteStream, CompletionRequest, Provider};
use super::configs::OpenAiProviderConfig;
use super::utils::{check_openai_context_length_error, messages_to_openai_spec, tools_to_openai_spec};
use crate::errors::ProviderError;
use crate::stream::event::{BlockDelta, BlockStart, ProviderEvent, StreamAdapter};

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, request: &CompletionRequest) -> Result<Value, ProviderError> {
        let system_message = json!({
            "role": "system",
            "content": request.system
        });
        let messages_spec = messages_to_openai_spec(&request.messages);
        let tools_spec = tools_to_openai_spec(&request.tools)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;

        let mut messages_array = vec![system_message];
        messages_array.extend(messages_spec);

        let mut payload = json!({
            "model": request.model.as_deref().unwrap_or(&self.config.model),
            "messages": messages_array,
            "stream": true,
        });

        if !tools_spec.is_empty() {
            payload["tools"] = json!(tools_spec);
        }
        if request.deep_reasoning {
            payload["reasoning_effort"] = json!("high");
        }
        if let Some(tokens) = self.config.max_tokens {
            payload["max_tokens"] = json!(tokens);
        }

        Ok(payload)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredentials(self.name().to_string()))?;
        let payload = self.build_payload(request)?;
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        Ok(Box::pin(response.bytes_stream().map_err(ProviderError::from)))
    }

    fn adapter(&self) -> Box<dyn StreamAdapter> {
        Box::new(OpenAiAdapter::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Thinking,
    Text,
    Tool(u64),
}

/// Rebuilds indexed blocks from chat completion chunks.
///
/// Chunks carry flat deltas, so blocks get synthetic indices in order of first
/// appearance. Text closes any open thinking block, and a finish reason closes
/// everything still open.
#[derive(Debug, Default)]
pub struct OpenAiAdapter {
    open: Vec<(Slot, u32)>,
    next_index: u32,
    stopped: bool,
}

impl OpenAiAdapter {
    fn index_of(&self, slot: Slot) -> Option<u32> {
        self.open
            .iter()
            .find(|(open, _)| *open == slot)
            .map(|(_, index)| *index)
    }

    fn ensure_open(
        &mut self,
        slot: Slot,
        start: impl FnOnce() -> BlockStart,
        events: &mut Vec<ProviderEvent>,
    ) -> u32 {
        if let Some(index) = self.index_of(slot) {
            return index;
        }
        let index = self.next_index;
        self.next_index += 1;
        self.open.push((slot, index));
        events.push(ProviderEvent::BlockStart {
            index,
            block: start(),
        });
        index
    }

    fn close(&mut self, slot: Slot, events: &mut Vec<ProviderEvent>) {
        if let Some(position) = self.open.iter().position(|(open, _)| *open == slot) {
            let (_, index) = self.open.remove(position);
            events.push(ProviderEvent::BlockStop { index });
        }
    }

    fn close_all(&mut self, events: &mut Vec<ProviderEvent>) {
        for (_, index) in self.open.drain(..) {
            events.push(ProviderEvent::BlockStop { index });
        }
    }

    fn tool_call(&mut self, call: &Value, events: &mut Vec<ProviderEvent>) {
        let position = call["index"].as_u64().unwrap_or(0);
        let slot = Slot::Tool(position);
        if self.index_of(slot).is_none() && call["function"]["name"].as_str().is_none() {
            tracing::debug!("Ignoring arguments for unannounced tool call {}", position);
            return;
        }
        self.close(Slot::Thinking, events);

        let index = self.ensure_open(
            slot,
            || BlockStart::ToolUse {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: call["function"]["name"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string(),
            },
            events,
        );
        if let Some(arguments) = call["function"]["arguments"]
            .as_str()
            .filter(|a| !a.is_empty())
        {
            events.push(ProviderEvent::BlockDelta {
                index,
                delta: BlockDelta::ToolInput(arguments.to_string()),
            });
        }
    }

    fn error(error: &Value) -> ProviderEvent {
        if let Some(err) = check_openai_context_length_error(error) {
            return ProviderEvent::Error {
                message: err.to_string(),
                retryable: false,
            };
        }
        let kind = error["type"].as_str().unwrap_or_default();
        let code = error["code"].as_str().unwrap_or_default();
        ProviderEvent::Error {
            message: error["message"]
                .as_str()
                .unwrap_or("Upstream stream error")
                .to_string(),
            retryable: kind == "server_error" || code == "rate_limit_exceeded",
        }
    }
}

impl StreamAdapter for OpenAiAdapter {
    fn adapt(&mut self, record: Value) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        if let Some(error) = record.get("error") {
            events.push(Self::error(error));
            return events;
        }
        let Some(choice) = record["choices"].get(0) else {
            // usage-only trailer
            return events;
        };
        let delta = &choice["delta"];

        let reasoning = delta["reasoning_content"]
            .as_str()
            .or_else(|| delta["reasoning"].as_str())
            .filter(|r| !r.is_empty());
        if let Some(reasoning) = reasoning {
            let index = self.ensure_open(Slot::Thinking, || BlockStart::Thinking, &mut events);
            events.push(ProviderEvent::BlockDelta {
                index,
                delta: BlockDelta::Thinking(reasoning.to_string()),
            });
        }

        if let Some(content) = delta["content"].as_str().filter(|c| !c.is_empty()) {
            self.close(Slot::Thinking, &mut events);
            let index = self.ensure_open(Slot::Text, || BlockStart::Text, &mut events);
            events.push(ProviderEvent::BlockDelta {
                index,
                delta: BlockDelta::Text(content.to_string()),
            });
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                self.tool_call(call, &mut events);
            }
        }

        if choice["finish_reason"].as_str().is_some() && !self.stopped {
            self.close_all(&mut events);
            self.stopped = true;
            events.push(ProviderEvent::MessageStop);
        }

        events
    }

    fn finish(&mut self) -> Vec<ProviderEvent> {
        let mut events = Vec::new();
        self.close_all(&mut events);
        events
    }
}
