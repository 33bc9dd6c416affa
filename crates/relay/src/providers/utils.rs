use anyhow::{anyhow, Result};
use regex::Regex;
use serde_json::{json, Value};

use crate::models::content::ImageContent;
use crate::models::message::{Message, MessageContent};
use crate::models::tool::Tool;

/// Convert internal Message format to OpenAI's chat completions message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });
        let mut parts = Vec::new();
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        parts.push(json!({"type": "text", "text": text.text}));
                    }
                }
                MessageContent::Image(image) => {
                    parts.push(json!({
                        "type": "image_url",
                        "image_url": {"url": image.url}
                    }));
                }
                MessageContent::ToolRequest(request) => {
                    let sanitized_name = sanitize_function_name(&request.tool_call.name);
                    let tool_calls = converted
                        .as_object_mut()
                        .and_then(|obj| {
                            obj.entry("tool_calls")
                                .or_insert(json!([]))
                                .as_array_mut()
                        });
                    if let Some(tool_calls) = tool_calls {
                        tool_calls.push(json!({
                            "id": request.id,
                            "type": "function",
                            "function": {
                                "name": sanitized_name,
                                "arguments": request.tool_call.arguments.to_string(),
                            }
                        }));
                    }
                }
                MessageContent::ToolResponse(response) => {
                    output.push(json!({
                        "role": "tool",
                        "content": response.output.to_string(),
                        "tool_call_id": response.id
                    }));
                }
            }
        }

        // plain text keeps the simple string form, anything with images uses parts
        match parts.as_slice() {
            [] => {}
            [single] if single["type"] == "text" => converted["content"] = single["text"].clone(),
            _ => converted["content"] = json!(parts),
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert internal Message format to Anthropic's messages specification
pub fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut blocks = Vec::new();
        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        blocks.push(json!({"type": "text", "text": text.text}));
                    }
                }
                MessageContent::Image(image) => blocks.push(anthropic_image(image)),
                MessageContent::ToolRequest(request) => {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": request.id,
                        "name": sanitize_function_name(&request.tool_call.name),
                        "input": request.tool_call.arguments,
                    }));
                }
                MessageContent::ToolResponse(response) => {
                    blocks.push(json!({
                        "type": "tool_result",
                        "tool_use_id": response.id,
                        "content": response.output.to_string(),
                    }));
                }
            }
        }

        if !blocks.is_empty() {
            messages_spec.push(json!({
                "role": message.role,
                "content": blocks,
            }));
        }
    }

    messages_spec
}

fn anthropic_image(image: &ImageContent) -> Value {
    json!({
        "type": "image",
        "source": {
            "type": "url",
            "url": image.url,
        }
    })
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Convert internal Tool format to Anthropic's API tool specification
pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.input_schema,
        }));
    }

    Ok(result)
}

pub fn sanitize_function_name(name: &str) -> String {
    match Regex::new(r"[^a-zA-Z0-9_-]") {
        Ok(re) => re.replace_all(name, "_").to_string(),
        Err(_) => name.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
