//! Contracts for the side-effecting back ends tools run against
//!
//! The coordinator only sees the traits; concrete clients live in the submodules and are
//! wired up by whoever builds the [`Collaborators`] set.
pub mod documents;
pub mod images;
pub mod storage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::errors::{ToolError, ToolResult};

/// Raw image produced by an image back end
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        prompt: &str,
        count: u8,
        aspect_ratio: Option<&str>,
    ) -> ToolResult<Vec<GeneratedImage>>;

    async fn edit(&self, source_url: &str, instruction: &str) -> ToolResult<GeneratedImage>;
}

/// Persists bytes and hands back a public URL for them
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn store(&self, bytes: Vec<u8>, filename: &str) -> ToolResult<String>;
}

#[async_trait]
pub trait PdfRenderer: Send + Sync {
    async fn render(&self, title: &str, content: &str) -> ToolResult<Vec<u8>>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactDescriptor {
    pub artifact_id: String,
    pub title: String,
    pub artifact_type: String,
    pub url: String,
}

#[async_trait]
pub trait ArtifactBuilder: Send + Sync {
    async fn create(
        &self,
        title: &str,
        html: &str,
        artifact_type: &str,
    ) -> ToolResult<ArtifactDescriptor>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetOperation {
    Generate,
    Edit,
}

/// An image that has been stored and can be reported to the client
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedAsset {
    pub asset_id: String,
    pub storage_url: String,
    pub model_name: String,
    pub operation: AssetOperation,
    pub prompt: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    pub mime_type: String,
}

/// Everything a turn's tools may call out to
#[derive(Clone)]
pub struct Collaborators {
    pub images: Arc<dyn ImageGenerator>,
    pub storage: Arc<dyn AssetStore>,
    pub pdf: Arc<dyn PdfRenderer>,
    pub artifacts: Arc<dyn ArtifactBuilder>,
}

/// Stand-in for a back end that has not been configured; every call fails.
#[derive(Debug, Clone)]
pub struct Unconfigured(pub &'static str);

#[async_trait]
impl ImageGenerator for Unconfigured {
    fn model_name(&self) -> &str {
        "unconfigured"
    }

    async fn generate(&self, _: &str, _: u8, _: Option<&str>) -> ToolResult<Vec<GeneratedImage>> {
        Err(ToolError::Unavailable(self.0.to_string()))
    }

    async fn edit(&self, _: &str, _: &str) -> ToolResult<GeneratedImage> {
        Err(ToolError::Unavailable(self.0.to_string()))
    }
}

#[async_trait]
impl PdfRenderer for Unconfigured {
    async fn render(&self, _: &str, _: &str) -> ToolResult<Vec<u8>> {
        Err(ToolError::Unavailable(self.0.to_string()))
    }
}

/// File extension for the mime types the back ends produce
pub fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "application/pdf" => "pdf",
        "text/html" => "html",
        _ => "bin",
    }
}
