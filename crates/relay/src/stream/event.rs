use serde_json::Value;

use super::sources::Source;

/// The provider-agnostic shape every vendor adapter translates its wire events into.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    BlockStart { index: u32, block: BlockStart },
    BlockDelta { index: u32, delta: BlockDelta },
    BlockStop { index: u32 },
    MessageStop,
    /// The provider reported a failure inside an otherwise healthy stream
    Error { message: String, retryable: bool },
}

/// What kind of block an index holds, plus whatever metadata arrives with its start event
#[derive(Debug, Clone, PartialEq)]
pub enum BlockStart {
    Text,
    Thinking,
    ToolUse { id: String, name: String },
    SearchResults { sources: Vec<Source> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum BlockDelta {
    Text(String),
    Thinking(String),
    ToolInput(String),
}

/// Translates one framed native record into zero or more provider events.
///
/// Adapters may keep state across records (OpenAI assigns block indices on the fly),
/// so a fresh adapter is created for every turn.
pub trait StreamAdapter: Send {
    fn adapt(&mut self, record: Value) -> Vec<ProviderEvent>;

    /// Called once the byte stream ends, to close anything the provider left open.
    fn finish(&mut self) -> Vec<ProviderEvent> {
        Vec::new()
    }
}
