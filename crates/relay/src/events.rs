use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::stream::sources::Source;

/// Events streamed back to the browser, one JSON object per line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundEvent {
    #[serde(rename_all = "camelCase")]
    TextDelta { content: String, is_thinking: bool },
    ThinkingSignal { started: bool },
    #[serde(rename_all = "camelCase")]
    ToolPreparing { tool_name: String, label: String },
    SearchStarted {},
    SearchCompleted { sources: Vec<Source> },
    #[serde(rename_all = "camelCase")]
    ToolResult { tool_name: String, payload: Value },
    #[serde(rename_all = "camelCase")]
    TurnCompleted {
        sources: Vec<Source>,
        used_search: bool,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
    },
}

impl OutboundEvent {
    pub fn text(content: impl Into<String>) -> Self {
        OutboundEvent::TextDelta {
            content: content.into(),
            is_thinking: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            OutboundEvent::TurnCompleted { .. } => true,
            OutboundEvent::Error { tool_name, .. } => tool_name.is_none(),
            _ => false,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    request_id: &'a str,
    #[serde(flatten)]
    event: &'a OutboundEvent,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("client disconnected")]
pub struct ClientDisconnected;

/// Writes events for one turn to the response body.
///
/// Every event becomes its own chunk on the channel, which the HTTP layer forwards
/// as soon as it is received. The terminal events consume the sink, so a turn ends
/// with exactly one of them and the body closes right after.
#[derive(Debug)]
pub struct EventSink {
    request_id: String,
    tx: mpsc::Sender<String>,
}

impl EventSink {
    pub fn new<S: Into<String>>(request_id: S, tx: mpsc::Sender<String>) -> Self {
        Self {
            request_id: request_id.into(),
            tx,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Emit a non-terminal event.
    pub async fn emit(&self, event: OutboundEvent) -> Result<(), ClientDisconnected> {
        debug_assert!(!event.is_terminal(), "terminal events go through complete/fail");
        self.write(&event).await
    }

    /// Report a failed tool call without ending the turn.
    pub async fn emit_tool_error(
        &self,
        tool_name: &str,
        tool_call_id: &str,
        message: String,
    ) -> Result<(), ClientDisconnected> {
        self.write(&OutboundEvent::Error {
            message,
            retryable: false,
            tool_name: Some(tool_name.to_string()),
            tool_call_id: Some(tool_call_id.to_string()),
        })
        .await
    }

    pub async fn complete(self, sources: Vec<Source>, used_search: bool) {
        let event = OutboundEvent::TurnCompleted {
            sources,
            used_search,
        };
        if self.write(&event).await.is_err() {
            tracing::debug!("Client gone before turn-completed for {}", self.request_id);
        }
    }

    pub async fn fail<S: Into<String>>(self, message: S, retryable: bool) {
        let event = OutboundEvent::Error {
            message: message.into(),
            retryable,
            tool_name: None,
            tool_call_id: None,
        };
        if self.write(&event).await.is_err() {
            tracing::debug!("Client gone before error for {}", self.request_id);
        }
    }

    async fn write(&self, event: &OutboundEvent) -> Result<(), ClientDisconnected> {
        let envelope = Envelope {
            request_id: &self.request_id,
            event,
        };
        let line = match serde_json::to_string(&envelope) {
            Ok(json) => format!("{}\n", json),
            Err(e) if event.is_terminal() => {
                tracing::error!("Failed to serialize terminal event, sending fallback: {}", e);
                fallback_terminal_line(&self.request_id)
            }
            Err(e) => {
                tracing::error!("Failed to serialize outbound event: {}", e);
                return Ok(());
            }
        };
        self.tx.send(line).await.map_err(|_| ClientDisconnected)
    }
}

/// Minimal terminal error, so the client still sees the turn end.
fn fallback_terminal_line(request_id: &str) -> String {
    let event = json!({
        "requestId": request_id,
        "type": "error",
        "message": "Failed to encode the final event of this turn",
        "retryable": true,
    });
    format!("{}\n", event)
}
