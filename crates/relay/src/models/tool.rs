use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// A tool that can be offered to a model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    /// The name of the tool
    pub name: String,
    /// A description of what the tool does
    pub description: String,
    /// JSON schema for the arguments the tool accepts
    pub input_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// A tool call as it appears in conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// The arguments for the execution
    pub arguments: Value,
}

impl ToolCall {
    pub fn new<S: Into<String>>(name: S, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// The tools the relay knows how to handle.
///
/// Names the relay has never heard of are kept rather than rejected, so a provider
/// adding its own native tools degrades to a no-op instead of failing the turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolName {
    ImageGenerate,
    ImageEdit,
    PdfGenerate,
    ArtifactCreate,
    WebSearch,
    Unknown(String),
}

impl ToolName {
    pub fn from_wire(name: &str) -> Self {
        match name {
            "generate_image" => ToolName::ImageGenerate,
            "edit_image" => ToolName::ImageEdit,
            "generate_pdf" => ToolName::PdfGenerate,
            "create_artifact" => ToolName::ArtifactCreate,
            "web_search" => ToolName::WebSearch,
            other => ToolName::Unknown(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> &str {
        match self {
            ToolName::ImageGenerate => "generate_image",
            ToolName::ImageEdit => "edit_image",
            ToolName::PdfGenerate => "generate_pdf",
            ToolName::ArtifactCreate => "create_artifact",
            ToolName::WebSearch => "web_search",
            ToolName::Unknown(name) => name,
        }
    }

    /// Progress label shown while the model is still writing the call.
    pub fn preparing_label(&self) -> Option<&'static str> {
        match self {
            ToolName::ImageGenerate => Some("Generating image..."),
            ToolName::ImageEdit => Some("Editing image..."),
            ToolName::PdfGenerate => Some("Creating PDF..."),
            ToolName::ArtifactCreate => Some("Building artifact..."),
            ToolName::WebSearch => Some("Searching the web..."),
            ToolName::Unknown(_) => None,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// A finalized request from the model to run a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub id: String,
    pub name: ToolName,
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new<S: Into<String>>(id: S, name: ToolName, arguments: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name,
            arguments,
        }
    }

    /// Deserialize the arguments into the typed shape a collaborator expects.
    pub fn parse_arguments<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.arguments.clone()))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ImageGenerateArgs {
    pub prompt: String,
    #[serde(default = "default_image_count")]
    pub count: u8,
    #[serde(default)]
    pub aspect_ratio: Option<String>,
}

/// Most images a single `generate_image` call may ask for
pub const MAX_IMAGE_COUNT: u8 = 4;

fn default_image_count() -> u8 {
    1
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ImageEditArgs {
    pub image_url: String,
    pub instruction: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PdfGenerateArgs {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ArtifactCreateArgs {
    pub title: String,
    pub html: String,
    #[serde(default = "default_artifact_type")]
    pub artifact_type: String,
}

fn default_artifact_type() -> String {
    "html".to_string()
}

/// Client-executed tools offered to every model. Search is provider native and is
/// added by the providers that support it.
pub fn relay_tools() -> Vec<Tool> {
    vec![
        Tool::new(
            "generate_image",
            "Generate one or more images from a text prompt",
            json!({
                "type": "object",
                "properties": {
                    "prompt": {"type": "string", "description": "What the image should show"},
                    "count": {"type": "integer", "minimum": 1, "maximum": MAX_IMAGE_COUNT},
                    "aspect_ratio": {"type": "string", "enum": ["1:1", "16:9", "9:16"]}
                },
                "required": ["prompt"]
            }),
        ),
        Tool::new(
            "edit_image",
            "Edit an existing image following an instruction",
            json!({
                "type": "object",
                "properties": {
                    "image_url": {"type": "string"},
                    "instruction": {"type": "string"}
                },
                "required": ["image_url", "instruction"]
            }),
        ),
        Tool::new(
            "generate_pdf",
            "Export a document as a PDF",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "content": {"type": "string", "description": "Markdown body of the document"}
                },
                "required": ["title", "content"]
            }),
        ),
        Tool::new(
            "create_artifact",
            "Create an interactive HTML artifact the user can open",
            json!({
                "type": "object",
                "properties": {
                    "title": {"type": "string"},
                    "html": {"type": "string"},
                    "artifact_type": {"type": "string"}
                },
                "required": ["title", "html"]
            }),
        ),
    ]
}
