use serde_json::{Map, Value};

use super::assembler::ContentBlock;
use crate::errors::DecodeError;
use crate::models::tool::{ToolInvocation, ToolName};

/// Turn a closed tool block into a typed invocation.
///
/// An empty argument fragment means the model called the tool with no arguments.
pub fn decode_invocation(block: &ContentBlock) -> Result<ToolInvocation, DecodeError> {
    let name = block
        .tool_name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(DecodeError::MissingName { index: block.index })?;

    let arguments = parse_arguments(block.index, &block.raw_arguments)?;
    let id = block
        .tool_call_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("call_{}", block.index));

    Ok(ToolInvocation::new(id, ToolName::from_wire(name), arguments))
}

fn parse_arguments(index: u32, raw: &str) -> Result<Map<String, Value>, DecodeError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(_) => Err(DecodeError::NotAnObject { index }),
        Err(source) => Err(DecodeError::InvalidJson { index, source }),
    }
}
