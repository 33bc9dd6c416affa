use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use relay::{
    events::EventSink,
    models::message::Message,
    models::tool::ToolCall,
    providers::factory::ProviderType,
    turn::TurnRequest,
};
use serde::Deserialize;
use serde_json::Value;
use std::{
    convert::Infallible,
    pin::Pin,
    str::FromStr,
    task::{Context, Poll},
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

// Types matching the incoming JSON structure
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplyRequest {
    #[serde(default)]
    request_id: Option<String>,
    messages: Vec<IncomingMessage>,
    #[serde(default)]
    system_prompt: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    image_mode: bool,
    #[serde(default)]
    reasoning_mode: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingMessage {
    role: String,
    #[serde(default)]
    content: String,
    /// Urls of images attached to the message
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    tool_invocations: Vec<IncomingToolInvocation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingToolInvocation {
    state: String,
    tool_call_id: String,
    tool_name: String,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    result: Option<Value>,
}

/// Newline delimited JSON body, one event per line, flushed as each line arrives
pub struct NdjsonResponse {
    rx: ReceiverStream<String>,
}

impl NdjsonResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for NdjsonResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for NdjsonResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        (
            [
                (header::CONTENT_TYPE, "application/x-ndjson"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            body,
        )
            .into_response()
    }
}

// Convert incoming messages to our internal Message type
fn convert_messages(incoming: Vec<IncomingMessage>) -> Vec<Message> {
    let mut messages = Vec::new();

    for msg in incoming {
        match msg.role.as_str() {
            "user" => {
                let mut message = Message::user().with_text(msg.content);
                for url in msg.images {
                    message = message.with_image(url, None);
                }
                messages.push(message);
            }
            "assistant" => {
                // First handle any tool invocations - each represents a complete request/response cycle
                for tool in msg.tool_invocations {
                    if tool.state != "result" {
                        continue;
                    }
                    // a request without its response is rejected upstream
                    let Some(result) = tool.result else {
                        tracing::warn!(
                            "Dropping {} ({}) from history, it has no result",
                            tool.tool_name,
                            tool.tool_call_id
                        );
                        continue;
                    };

                    // Add the original tool request from assistant
                    let tool_call = ToolCall::new(tool.tool_name, tool.args);
                    messages.push(
                        Message::assistant().with_tool_request(tool.tool_call_id.clone(), tool_call),
                    );

                    // Add the tool response from user
                    messages.push(Message::user().with_tool_response(tool.tool_call_id, result));
                }

                // Then add the assistant's text response after tool interactions
                if !msg.content.is_empty() {
                    messages.push(Message::assistant().with_text(msg.content));
                }
            }
            _ => {
                tracing::warn!("Unknown role: {}", msg.role);
            }
        }
    }

    messages
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

async fn handler(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ReplyRequest>,
) -> Result<NdjsonResponse, StatusCode> {
    let provider_type = ProviderType::from_str(&provider).map_err(|_| StatusCode::NOT_FOUND)?;
    let orchestrator = state
        .orchestrator(provider_type)
        .ok_or(StatusCode::NOT_FOUND)?;

    let request_id = request
        .request_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let turn = TurnRequest {
        model: request.model,
        deep_reasoning: request.reasoning_mode,
        image_mode: request.image_mode,
        system_prompt: request.system_prompt,
        summary: request.summary,
        messages: convert_messages(request.messages),
    };
    let bearer = bearer_token(&headers);

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    let sink = EventSink::new(request_id, tx);

    // The turn outlives this handler; the body streams while it runs
    tokio::spawn(async move {
        let state = orchestrator.run(bearer.as_deref(), turn, sink).await;
        tracing::debug!("Turn finished in state {}", state);
    });

    Ok(NdjsonResponse::new(ReceiverStream::new(rx)))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/reply/:provider", post(handler))
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use relay::auth::{PermissionTier, StaticTokenResolver};
    use relay::collaborators::documents::StoredArtifactBuilder;
    use relay::collaborators::storage::FsAssetStore;
    use relay::collaborators::{Collaborators, Unconfigured};
    use relay::coordinator::ToolCoordinator;
    use relay::errors::ProviderError;
    use relay::models::message::MessageContent;
    use relay::providers::anthropic::AnthropicAdapter;
    use relay::providers::base::{ByteStream, CompletionRequest, Provider};
    use relay::stream::event::StreamAdapter;
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Replays a fixed Anthropic-format body
    pub struct ScriptedProvider(pub &'static str);

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "anthropic"
        }

        async fn stream(&self, _: &CompletionRequest) -> Result<ByteStream, ProviderError> {
            let chunks = self
                .0
                .as_bytes()
                .chunks(16)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect::<Vec<_>>();
            Ok(Box::pin(futures::stream::iter(chunks)))
        }

        fn adapter(&self) -> Box<dyn StreamAdapter> {
            Box::new(AnthropicAdapter)
        }
    }

    pub const HELLO: &str = concat!(
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello \"}}\n\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"there\"}}\n\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    const DRAW: &str = concat!(
        "data: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"tool_use\",\"id\":\"toolu_1\",\"name\":\"generate_image\",\"input\":{}}}\n\n",
        "data: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"input_json_delta\",\"partial_json\":\"{\\\"prompt\\\":\\\"a cat\\\"}\"}}\n\n",
        "data: {\"type\":\"content_block_stop\",\"index\":0}\n\n",
        "data: {\"type\":\"message_stop\"}\n\n",
    );

    pub fn test_state(body: &'static str, assets_dir: &std::path::Path) -> AppState {
        let storage = Arc::new(FsAssetStore::new(assets_dir, "http://localhost/assets"));
        let collaborators = Collaborators {
            images: Arc::new(Unconfigured("image generation")),
            pdf: Arc::new(Unconfigured("pdf rendering")),
            artifacts: Arc::new(StoredArtifactBuilder::new(storage.clone())),
            storage,
        };
        let auth = StaticTokenResolver::new().with_token("tok-1", "ada", PermissionTier::Pro);
        AppState::new(Arc::new(auth), ToolCoordinator::new(collaborators))
            .with_provider(ProviderType::Anthropic, Arc::new(ScriptedProvider(body)))
    }

    fn reply_request(provider: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/reply/{}", provider))
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn read_events(response: axum::response::Response) -> Vec<Value> {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_reply_streams_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(test_state(HELLO, dir.path()));

        let response = app
            .oneshot(reply_request(
                "anthropic",
                Some("tok-1"),
                json!({"requestId": "r-42", "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "application/x-ndjson"
        );
        let events = read_events(response).await;
        let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["text-delta", "text-delta", "turn-completed"]);
        assert_eq!(events[0]["content"], "Hello ");
        assert!(events.iter().all(|e| e["requestId"] == "r-42"));
    }

    #[tokio::test]
    async fn test_missing_token_is_a_terminal_error() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(test_state(HELLO, dir.path()));

        let response = app
            .oneshot(reply_request(
                "anthropic",
                None,
                json!({"messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();

        let events = read_events(response).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "error");
        assert_eq!(events[0]["retryable"], false);
        // a fresh id is assigned when the client sends none
        assert!(Uuid::parse_str(events[0]["requestId"].as_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_unconfigured_tool_is_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let app = routes(test_state(DRAW, dir.path()));

        let response = app
            .oneshot(reply_request(
                "anthropic",
                Some("tok-1"),
                json!({"messages": [{"role": "user", "content": "draw a cat"}], "imageMode": true}),
            ))
            .await
            .unwrap();

        let events = read_events(response).await;
        let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(kinds, vec!["tool-preparing", "error", "turn-completed"]);
        assert_eq!(events[1]["toolName"], "generate_image");
        assert_eq!(events[1]["toolCallId"], "toolu_1");
    }

    #[tokio::test]
    async fn test_unknown_or_unrouted_provider() {
        let dir = tempfile::tempdir().unwrap();
        let body = json!({"messages": []});

        let response = routes(test_state(HELLO, dir.path()))
            .oneshot(reply_request("ollama", Some("tok-1"), body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // openai is a known provider but this state never registered it
        let response = routes(test_state(HELLO, dir.path()))
            .oneshot(reply_request("openai", Some("tok-1"), body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_convert_messages_replays_tool_calls() {
        let incoming: Vec<IncomingMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "draw a cat", "images": ["https://cdn.test/ref.png"]},
            {
                "role": "assistant",
                "content": "Here it is",
                "toolInvocations": [{
                    "state": "result",
                    "toolCallId": "toolu_1",
                    "toolName": "generate_image",
                    "args": {"prompt": "a cat"},
                    "result": {"assets": []}
                }, {
                    "state": "call",
                    "toolCallId": "toolu_2",
                    "toolName": "generate_pdf",
                    "args": {}
                }]
            },
            {"role": "system", "content": "ignored"}
        ]))
        .unwrap();

        let messages = convert_messages(incoming);
        assert_eq!(messages.len(), 4);
        assert!(matches!(messages[0].content[1], MessageContent::Image(_)));
        let request = messages[1].content[0].as_tool_request().unwrap();
        assert_eq!(request.id, "toolu_1");
        assert_eq!(request.tool_call.arguments, json!({"prompt": "a cat"}));
        assert!(messages[2].content[0].as_tool_response().is_some());
        assert_eq!(messages[3].text(), "Here it is");
    }

    #[test]
    fn test_convert_messages_skips_results_without_payload() {
        let incoming: Vec<IncomingMessage> = serde_json::from_value(json!([
            {"role": "user", "content": "make a pdf"},
            {
                "role": "assistant",
                "content": "Done",
                "toolInvocations": [{
                    "state": "result",
                    "toolCallId": "toolu_1",
                    "toolName": "generate_pdf",
                    "args": {"title": "Notes", "content": "x"}
                }]
            }
        ]))
        .unwrap();

        let messages = convert_messages(incoming);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].text(), "make a pdf");
        assert_eq!(messages[1].text(), "Done");
        assert!(messages
            .iter()
            .flat_map(|m| m.content.iter())
            .all(|c| c.as_tool_request().is_none()));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, "Bearer  tok-1 ".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("tok-1"));
        headers.insert(header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
