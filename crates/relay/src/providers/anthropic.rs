use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{ByteStream, CompletionRequest, Provider};
use super::configs::AnthropicProviderConfig;
use super::utils::{messages_to_anthropic_spec, tools_to_anthropic_spec};
use crate::errors::ProviderError;
use crate::stream::event::{BlockDelta, BlockStart, ProviderEvent, StreamAdapter};
use crate::stream::sources::Source;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const WEB_SEARCH_MAX_USES: u32 = 5;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn build_payload(&self, request: &CompletionRequest) -> Result<Value, ProviderError> {
        let mut tools = tools_to_anthropic_spec(&request.tools)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
        tools.push(json!({
            "type": "web_search_20250305",
            "name": "web_search",
            "max_uses": WEB_SEARCH_MAX_USES,
        }));

        let mut payload = json!({
            "model": request.model.as_deref().unwrap_or(&self.config.model),
            "max_tokens": self.config.max_tokens,
            "system": request.system,
            "messages": messages_to_anthropic_spec(&request.messages),
            "tools": tools,
            "stream": true,
        });

        if request.deep_reasoning {
            let budget = self.config.thinking_budget;
            payload["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
            // the output budget has to leave room for the thinking budget
            if self.config.max_tokens <= budget {
                payload["max_tokens"] = json!(budget + self.config.max_tokens);
            }
        }

        Ok(payload)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<ByteStream, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredentials(self.name().to_string()))?;
        let payload = self.build_payload(request)?;
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
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
        Box::new(AnthropicAdapter)
    }
}

/// Translates the Messages API streaming events.
///
/// Anthropic already speaks in indexed blocks, so this is a stateless mapping.
#[derive(Debug, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    fn block_start(index: u32, block: &Value) -> Vec<ProviderEvent> {
        let start = |block| ProviderEvent::BlockStart { index, block };
        let delta = |delta| ProviderEvent::BlockDelta { index, delta };

        match block["type"].as_str().unwrap_or_default() {
            "text" => {
                let mut events = vec![start(BlockStart::Text)];
                if let Some(text) = block["text"].as_str().filter(|t| !t.is_empty()) {
                    events.push(delta(BlockDelta::Text(text.to_string())));
                }
                events
            }
            "thinking" | "redacted_thinking" => vec![start(BlockStart::Thinking)],
            "tool_use" | "server_tool_use" => {
                let id = block["id"].as_str().unwrap_or_default().to_string();
                let name = block["name"].as_str().unwrap_or_default().to_string();
                let mut events = vec![start(BlockStart::ToolUse { id, name })];
                // input normally streams as json deltas; anything present up front counts too
                match block.get("input") {
                    Some(Value::Object(input)) if !input.is_empty() => {
                        events.push(delta(BlockDelta::ToolInput(block["input"].to_string())));
                    }
                    _ => {}
                }
                events
            }
            "web_search_tool_result" => {
                let sources = block["content"]
                    .as_array()
                    .map(|results| {
                        results
                            .iter()
                            .filter(|r| r["type"] == "web_search_result")
                            .filter_map(|r| {
                                let url = r["url"].as_str()?;
                                let title = r["title"].as_str().unwrap_or(url);
                                Some(Source::new(title, url))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                vec![start(BlockStart::SearchResults { sources })]
            }
            other => {
                tracing::debug!("Ignoring anthropic block type {}", other);
                Vec::new()
            }
        }
    }

    fn block_delta(index: u32, delta: &Value) -> Option<ProviderEvent> {
        let text = |key: &str| delta[key].as_str().map(str::to_string);
        let delta = match delta["type"].as_str().unwrap_or_default() {
            "text_delta" => BlockDelta::Text(text("text")?),
            "thinking_delta" => BlockDelta::Thinking(text("thinking")?),
            "input_json_delta" => BlockDelta::ToolInput(text("partial_json")?),
            _ => return None,
        };
        Some(ProviderEvent::BlockDelta { index, delta })
    }
}

fn index_of(record: &Value) -> Option<u32> {
    record["index"].as_u64().and_then(|i| u32::try_from(i).ok())
}

impl StreamAdapter for AnthropicAdapter {
    fn adapt(&mut self, record: Value) -> Vec<ProviderEvent> {
        match record["type"].as_str().unwrap_or_default() {
            "content_block_start" => match index_of(&record) {
                Some(index) => Self::block_start(index, &record["content_block"]),
                None => Vec::new(),
            },
            "content_block_delta" => index_of(&record)
                .and_then(|index| Self::block_delta(index, &record["delta"]))
                .into_iter()
                .collect(),
            "content_block_stop" => index_of(&record)
                .map(|index| ProviderEvent::BlockStop { index })
                .into_iter()
                .collect(),
            "message_stop" => vec![ProviderEvent::MessageStop],
            "error" => {
                let error = &record["error"];
                let kind = error["type"].as_str().unwrap_or("error");
                vec![ProviderEvent::Error {
                    message: error["message"].as_str().unwrap_or(kind).to_string(),
                    retryable: matches!(
                        kind,
                        "overloaded_error" | "rate_limit_error" | "api_error"
                    ),
                }]
            }
            // message_start, message_delta and ping carry nothing the relay forwards
            _ => Vec::new(),
        }
    }
}
