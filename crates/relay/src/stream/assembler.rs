use std::collections::BTreeMap;

use super::decoder::decode_invocation;
use super::event::{BlockDelta, BlockStart, ProviderEvent};
use super::sources::{Source, MAX_SOURCES_PER_BLOCK};
use crate::models::tool::{ToolInvocation, ToolName};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    Thinking,
    ToolInvocation,
    SearchResult,
}

/// One indexed unit of model output, accumulated while its block is open
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub index: u32,
    pub kind: BlockKind,
    pub text: String,
    pub raw_arguments: String,
    pub tool_name: Option<String>,
    pub tool_call_id: Option<String>,
    pub sources: Vec<Source>,
}

impl ContentBlock {
    fn open(index: u32, start: BlockStart) -> Self {
        let mut block = ContentBlock {
            index,
            kind: BlockKind::Text,
            text: String::new(),
            raw_arguments: String::new(),
            tool_name: None,
            tool_call_id: None,
            sources: Vec::new(),
        };
        match start {
            BlockStart::Text => {}
            BlockStart::Thinking => block.kind = BlockKind::Thinking,
            BlockStart::ToolUse { id, name } => {
                block.kind = BlockKind::ToolInvocation;
                block.tool_call_id = Some(id);
                block.tool_name = Some(name);
            }
            BlockStart::SearchResults { sources } => {
                block.kind = BlockKind::SearchResult;
                block.sources = sources;
            }
        }
        block
    }
}

#[derive(Debug)]
enum BlockState {
    Open(ContentBlock),
    Closed,
}

/// What a closed block turned into
#[derive(Debug, Clone, PartialEq)]
pub enum FinishedBlock {
    Text(String),
    Thinking(String),
    Invocation(ToolInvocation),
    Sources(Vec<Source>),
    /// A tool block whose arguments could not be decoded
    Dropped,
}

/// The observable effect of applying one provider event
#[derive(Debug, Clone, PartialEq)]
pub enum BlockTransition {
    Opened {
        index: u32,
        kind: BlockKind,
        tool_name: Option<ToolName>,
    },
    Appended {
        index: u32,
        kind: BlockKind,
        fragment: String,
    },
    Closed {
        index: u32,
        block: FinishedBlock,
    },
}

/// Per-turn state machine over content blocks, keyed by provider index.
///
/// Each index moves `absent -> open -> closed`. Events that would break that order
/// (a delta before the start, anything after the stop, a second start) are ignored.
#[derive(Debug, Default)]
pub struct BlockAssembler {
    blocks: BTreeMap<u32, BlockState>,
    invocations: BTreeMap<u32, ToolInvocation>,
}

impl BlockAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: ProviderEvent) -> Option<BlockTransition> {
        match event {
            ProviderEvent::BlockStart { index, block } => self.start(index, block),
            ProviderEvent::BlockDelta { index, delta } => self.delta(index, delta),
            ProviderEvent::BlockStop { index } => self.stop(index),
            ProviderEvent::MessageStop | ProviderEvent::Error { .. } => None,
        }
    }

    fn start(&mut self, index: u32, start: BlockStart) -> Option<BlockTransition> {
        if self.blocks.contains_key(&index) {
            tracing::debug!("Ignoring repeated start for block {}", index);
            return None;
        }
        let block = ContentBlock::open(index, start);
        let transition = BlockTransition::Opened {
            index,
            kind: block.kind,
            tool_name: block.tool_name.as_deref().map(ToolName::from_wire),
        };
        self.blocks.insert(index, BlockState::Open(block));
        Some(transition)
    }

    fn delta(&mut self, index: u32, delta: BlockDelta) -> Option<BlockTransition> {
        let Some(BlockState::Open(block)) = self.blocks.get_mut(&index) else {
            tracing::debug!("Ignoring delta for block {} which is not open", index);
            return None;
        };
        let fragment = match (block.kind, delta) {
            (BlockKind::Text, BlockDelta::Text(text))
            | (BlockKind::Thinking, BlockDelta::Thinking(text)) => {
                block.text.push_str(&text);
                text
            }
            (BlockKind::ToolInvocation, BlockDelta::ToolInput(json)) => {
                block.raw_arguments.push_str(&json);
                json
            }
            (kind, delta) => {
                tracing::debug!("Ignoring {:?} for {:?} block {}", delta, kind, index);
                return None;
            }
        };
        Some(BlockTransition::Appended {
            index,
            kind: block.kind,
            fragment,
        })
    }

    fn stop(&mut self, index: u32) -> Option<BlockTransition> {
        let open = self
            .blocks
            .get_mut(&index)
            .map(|state| std::mem::replace(state, BlockState::Closed));
        let Some(BlockState::Open(block)) = open else {
            tracing::debug!("Ignoring stop for block {} which is not open", index);
            return None;
        };

        let finished = match block.kind {
            BlockKind::Text => FinishedBlock::Text(block.text),
            BlockKind::Thinking => FinishedBlock::Thinking(block.text),
            BlockKind::SearchResult => {
                let mut sources = block.sources;
                sources.truncate(MAX_SOURCES_PER_BLOCK);
                FinishedBlock::Sources(sources)
            }
            BlockKind::ToolInvocation => match decode_invocation(&block) {
                Ok(invocation) => {
                    self.invocations.insert(index, invocation.clone());
                    FinishedBlock::Invocation(invocation)
                }
                Err(e) => {
                    tracing::warn!("Dropping tool call: {}", e);
                    FinishedBlock::Dropped
                }
            },
        };
        Some(BlockTransition::Closed {
            index,
            block: finished,
        })
    }

    /// Hand over every decoded invocation, in the order the model emitted them.
    pub fn take_invocations(&mut self) -> Vec<ToolInvocation> {
        std::mem::take(&mut self.invocations).into_values().collect()
    }

    /// Indices that were opened but never stopped
    pub fn open_indices(&self) -> Vec<u32> {
        self.blocks
            .iter()
            .filter(|(_, state)| matches!(state, BlockState::Open(_)))
            .map(|(index, _)| *index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn start(index: u32, block: BlockStart) -> ProviderEvent {
        ProviderEvent::BlockStart { index, block }
    }

    fn delta(index: u32, delta: BlockDelta) -> ProviderEvent {
        ProviderEvent::BlockDelta { index, delta }
    }

    fn stop(index: u32) -> ProviderEvent {
        ProviderEvent::BlockStop { index }
    }

    fn tool(id: &str, name: &str) -> BlockStart {
        BlockStart::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_text_block_accumulates() {
        let mut assembler = BlockAssembler::new();
        assembler.apply(start(0, BlockStart::Text));
        assembler.apply(delta(0, BlockDelta::Text("Hello, ".into())));
        assembler.apply(delta(0, BlockDelta::Text("world".into())));

        let closed = assembler.apply(stop(0));
        assert_eq!(
            closed,
            Some(BlockTransition::Closed {
                index: 0,
                block: FinishedBlock::Text("Hello, world".into())
            })
        );
    }

    #[test]
    fn test_interleaved_tool_and_text() {
        let mut assembler = BlockAssembler::new();
        assembler.apply(start(1, tool("call_1", "generate_image")));
        assembler.apply(delta(1, BlockDelta::ToolInput("{\"prompt\":".into())));
        assembler.apply(start(3, BlockStart::Text));
        assembler.apply(delta(3, BlockDelta::Text("drawing".into())));
        assembler.apply(delta(1, BlockDelta::ToolInput("\"a cat\"}".into())));
        assembler.apply(stop(3));
        assembler.apply(stop(1));

        let invocations = assembler.take_invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].id, "call_1");
        assert_eq!(invocations[0].name, ToolName::ImageGenerate);
        assert_eq!(json!(invocations[0].arguments), json!({"prompt": "a cat"}));
    }

    #[test]
    fn test_tool_without_deltas_has_empty_arguments() {
        let mut assembler = BlockAssembler::new();
        assembler.apply(start(0, tool("call_1", "generate_pdf")));
        let closed = assembler.apply(stop(0));

        match closed {
            Some(BlockTransition::Closed {
                block: FinishedBlock::Invocation(invocation),
                ..
            }) => assert!(invocation.arguments.is_empty()),
            other => panic!("expected invocation, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_arguments_are_dropped() {
        let mut assembler = BlockAssembler::new();
        assembler.apply(start(0, tool("call_1", "generate_image")));
        assembler.apply(delta(0, BlockDelta::ToolInput("{\"prompt\": ".into())));
        let closed = assembler.apply(stop(0));

        assert_eq!(
            closed,
            Some(BlockTransition::Closed {
                index: 0,
                block: FinishedBlock::Dropped
            })
        );
        assert!(assembler.take_invocations().is_empty());
    }

    #[test]
    fn test_illegal_transitions_are_ignored() {
        let mut assembler = BlockAssembler::new();
        // delta before start
        assert_eq!(assembler.apply(delta(0, BlockDelta::Text("x".into()))), None);
        // stop before start
        assert_eq!(assembler.apply(stop(0)), None);

        assembler.apply(start(0, BlockStart::Text));
        // a second start cannot change the kind
        assert_eq!(assembler.apply(start(0, BlockStart::Thinking)), None);
        // mismatched delta kind
        assert_eq!(
            assembler.apply(delta(0, BlockDelta::ToolInput("{}".into()))),
            None
        );
        assembler.apply(delta(0, BlockDelta::Text("ok".into())));
        assembler.apply(stop(0));

        // closed is terminal
        assert_eq!(assembler.apply(delta(0, BlockDelta::Text("late".into()))), None);
        assert_eq!(assembler.apply(stop(0)), None);
        assert_eq!(assembler.apply(start(0, BlockStart::Text)), None);
    }

    #[test]
    fn test_invocations_ordered_by_index() {
        let mut assembler = BlockAssembler::new();
        assembler.apply(start(4, tool("b", "generate_pdf")));
        assembler.apply(start(2, tool("a", "generate_image")));
        assembler.apply(stop(4));
        assembler.apply(stop(2));

        let ids: Vec<_> = assembler
            .take_invocations()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_search_results_capped_per_block() {
        let sources: Vec<_> = (0..8)
            .map(|i| Source::new(format!("S{}", i), format!("https://s{}.example/", i)))
            .collect();
        let mut assembler = BlockAssembler::new();
        assembler.apply(start(2, BlockStart::SearchResults { sources }));

        match assembler.apply(stop(2)) {
            Some(BlockTransition::Closed {
                block: FinishedBlock::Sources(sources),
                ..
            }) => assert_eq!(sources.len(), MAX_SOURCES_PER_BLOCK),
            other => panic!("expected sources, got {:?}", other),
        }
    }

    #[test]
    fn test_open_indices() {
        let mut assembler = BlockAssembler::new();
        assembler.apply(start(0, BlockStart::Text));
        assembler.apply(start(1, BlockStart::Thinking));
        assembler.apply(stop(0));
        assert_eq!(assembler.open_indices(), vec![1]);
    }
}
