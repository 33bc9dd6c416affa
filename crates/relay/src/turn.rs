use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tokio::time::timeout;
use tracing::Instrument;

use crate::auth::AuthResolver;
use crate::coordinator::ToolCoordinator;
use crate::events::{ClientDisconnected, EventSink, OutboundEvent};
use crate::models::message::Message;
use crate::models::tool::{relay_tools, ToolName};
use crate::providers::base::{ByteStream, CompletionRequest, Provider};
use crate::stream::assembler::{BlockAssembler, BlockKind, BlockTransition, FinishedBlock};
use crate::stream::event::{ProviderEvent, StreamAdapter};
use crate::stream::framer::{parse_record, LineFramer};
use crate::stream::sources::SourceAggregator;

const HEARTBEAT: Duration = Duration::from_millis(500);
const SUMMARY_HEADING: &str = "## Summary of the earlier conversation";
const IMAGE_MODE_DIRECTIVE: &str =
    "The user has switched on image mode: they want an image. Use the generate_image tool \
     (or edit_image for an image already in the conversation) to answer this message.";

/// One user message to relay, with the behavior flags the client chose for it.
///
/// The request id travels on the [`EventSink`] that receives the turn's events.
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    pub model: Option<String>,
    pub deep_reasoning: bool,
    pub image_mode: bool,
    pub system_prompt: String,
    pub summary: Option<String>,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum TurnState {
    Authenticating,
    StreamingUpstream,
    ToolExecution,
    Completed,
    Errored,
}

/// Why the upstream pump stopped early
enum Interrupt {
    Disconnected,
    Failed { message: String, retryable: bool },
}

impl From<ClientDisconnected> for Interrupt {
    fn from(_: ClientDisconnected) -> Self {
        Interrupt::Disconnected
    }
}

/// All mutable state of one turn. Created when the turn starts and dropped with it.
struct RequestContext {
    state: TurnState,
    assembler: BlockAssembler,
    sources: SourceAggregator,
    used_search: bool,
}

impl RequestContext {
    fn new() -> Self {
        Self {
            state: TurnState::Authenticating,
            assembler: BlockAssembler::new(),
            sources: SourceAggregator::new(),
            used_search: false,
        }
    }

    fn transition(&mut self, next: TurnState) {
        tracing::debug!("Turn {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Drives one turn from authentication to its terminal event.
///
/// Every path through [`Orchestrator::run`] writes exactly one of `turn-completed` or
/// `error` unless the client has already gone away.
#[derive(Clone)]
pub struct Orchestrator {
    auth: Arc<dyn AuthResolver>,
    provider: Arc<dyn Provider>,
    coordinator: ToolCoordinator,
}

impl Orchestrator {
    pub fn new(
        auth: Arc<dyn AuthResolver>,
        provider: Arc<dyn Provider>,
        coordinator: ToolCoordinator,
    ) -> Self {
        Self {
            auth,
            provider,
            coordinator,
        }
    }

    /// Run the turn, writing its events to `sink`. Returns the state the turn ended in.
    pub async fn run(
        &self,
        bearer_token: Option<&str>,
        request: TurnRequest,
        sink: EventSink,
    ) -> TurnState {
        let span = tracing::info_span!(
            "turn",
            request_id = %sink.request_id(),
            provider = %self.provider.name()
        );
        self.run_turn(bearer_token, request, sink)
            .instrument(span)
            .await
    }

    async fn run_turn(
        &self,
        bearer_token: Option<&str>,
        request: TurnRequest,
        sink: EventSink,
    ) -> TurnState {
        let mut ctx = RequestContext::new();

        let caller = match self.auth.resolve(bearer_token).await {
            Ok(caller) => caller,
            Err(e) => {
                tracing::warn!("Rejecting turn: {}", e);
                ctx.transition(TurnState::Errored);
                sink.fail(e.to_string(), false).await;
                return ctx.state;
            }
        };
        tracing::info!("Turn started for {} ({})", caller.identity, caller.tier);

        ctx.transition(TurnState::StreamingUpstream);
        let completion = CompletionRequest {
            system: compose_system_prompt(&request),
            messages: request.messages,
            tools: relay_tools(),
            model: request.model,
            deep_reasoning: request.deep_reasoning,
        };
        let stream = match self.provider.stream(&completion).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Upstream request failed: {}", e);
                ctx.transition(TurnState::Errored);
                sink.fail(e.to_string(), e.is_retryable()).await;
                return ctx.state;
            }
        };

        match self.pump(stream, &mut ctx, &sink).await {
            Ok(()) => {}
            Err(Interrupt::Disconnected) => {
                tracing::info!("Client disconnected, releasing upstream");
                ctx.transition(TurnState::Errored);
                return ctx.state;
            }
            Err(Interrupt::Failed { message, retryable }) => {
                tracing::error!("Upstream stream failed: {}", message);
                ctx.transition(TurnState::Errored);
                sink.fail(message, retryable).await;
                return ctx.state;
            }
        }

        let unfinished = ctx.assembler.open_indices();
        if !unfinished.is_empty() {
            tracing::warn!("Upstream ended with blocks still open: {:?}", unfinished);
        }

        let invocations = ctx.assembler.take_invocations();
        if !invocations.is_empty() {
            ctx.transition(TurnState::ToolExecution);
            let outcomes = self.coordinator.execute(invocations, &sink).await;
            tracing::debug!("Tool outcomes: {:?}", outcomes);
        }

        if sink.is_closed() {
            tracing::info!("Client disconnected before the turn completed");
            ctx.transition(TurnState::Errored);
            return ctx.state;
        }

        ctx.transition(TurnState::Completed);
        sink.complete(ctx.sources.sources().to_vec(), ctx.used_search)
            .await;
        ctx.state
    }

    /// Read the upstream body to its end, forwarding live events as blocks change.
    async fn pump(
        &self,
        mut stream: ByteStream,
        ctx: &mut RequestContext,
        sink: &EventSink,
    ) -> Result<(), Interrupt> {
        let mut framer = LineFramer::new();
        let mut adapter = self.provider.adapter();

        loop {
            let chunk = match timeout(HEARTBEAT, stream.next()).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                // heartbeat, notices a departed client while upstream is quiet
                Err(_) => {
                    if sink.is_closed() {
                        return Err(Interrupt::Disconnected);
                    }
                    continue;
                }
            };
            if sink.is_closed() {
                return Err(Interrupt::Disconnected);
            }
            let chunk = chunk.map_err(|e| Interrupt::Failed {
                message: format!("Connection to the model was interrupted: {}", e),
                retryable: true,
            })?;
            for line in framer.push(&chunk) {
                self.handle_line(&line, adapter.as_mut(), ctx, sink).await?;
            }
        }

        if let Some(line) = framer.finish() {
            self.handle_line(&line, adapter.as_mut(), ctx, sink).await?;
        }
        for event in adapter.finish() {
            self.handle_event(event, ctx, sink).await?;
        }
        Ok(())
    }

    async fn handle_line(
        &self,
        line: &str,
        adapter: &mut dyn StreamAdapter,
        ctx: &mut RequestContext,
        sink: &EventSink,
    ) -> Result<(), Interrupt> {
        let Some(record) = parse_record(line) else {
            return Ok(());
        };
        for event in adapter.adapt(record) {
            self.handle_event(event, ctx, sink).await?;
        }
        Ok(())
    }

    async fn handle_event(
        &self,
        event: ProviderEvent,
        ctx: &mut RequestContext,
        sink: &EventSink,
    ) -> Result<(), Interrupt> {
        match event {
            ProviderEvent::Error { message, retryable } => {
                Err(Interrupt::Failed { message, retryable })
            }
            ProviderEvent::MessageStop => {
                tracing::debug!("Upstream message stopped");
                Ok(())
            }
            event => match ctx.assembler.apply(event) {
                Some(transition) => forward(transition, ctx, sink).await,
                None => Ok(()),
            },
        }
    }
}

/// Turn an assembler transition into whatever the client should see right now.
async fn forward(
    transition: BlockTransition,
    ctx: &mut RequestContext,
    sink: &EventSink,
) -> Result<(), Interrupt> {
    let event = match transition {
        BlockTransition::Opened {
            kind: BlockKind::Thinking,
            ..
        } => OutboundEvent::ThinkingSignal { started: true },
        BlockTransition::Opened {
            tool_name: Some(ToolName::WebSearch),
            ..
        } => {
            ctx.used_search = true;
            OutboundEvent::SearchStarted {}
        }
        BlockTransition::Opened {
            tool_name: Some(name),
            ..
        } => match name.preparing_label() {
            Some(label) => OutboundEvent::ToolPreparing {
                tool_name: name.to_string(),
                label: label.to_string(),
            },
            None => return Ok(()),
        },
        BlockTransition::Appended {
            kind: BlockKind::Text,
            fragment,
            ..
        } => OutboundEvent::text(fragment),
        BlockTransition::Closed {
            block: FinishedBlock::Thinking(_),
            ..
        } => OutboundEvent::ThinkingSignal { started: false },
        BlockTransition::Closed {
            block: FinishedBlock::Sources(sources),
            ..
        } => {
            ctx.used_search = true;
            OutboundEvent::SearchCompleted {
                sources: ctx.sources.add(sources).to_vec(),
            }
        }
        _ => return Ok(()),
    };
    sink.emit(event).await?;
    Ok(())
}

/// The system prompt sent upstream: the client's prompt, then the rolling summary and
/// the image-mode directive when present.
pub fn compose_system_prompt(request: &TurnRequest) -> String {
    let mut prompt = request.system_prompt.trim().to_string();
    let mut append = |section: &str| {
        if !prompt.is_empty() {
            prompt.push_str("\n\n");
        }
        prompt.push_str(section);
    };

    if let Some(summary) = request
        .summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        append(&format!("{}\n{}", SUMMARY_HEADING, summary));
    }
    if request.image_mode {
        append(IMAGE_MODE_DIRECTIVE);
    }
    prompt
}
