use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use super::{ArtifactBuilder, ArtifactDescriptor, AssetStore, PdfRenderer};
use crate::errors::{ToolError, ToolResult};

/// Renders PDFs by posting `{title, content}` to an external rendering service
pub struct HttpPdfRenderer {
    client: Client,
    endpoint: String,
}

impl HttpPdfRenderer {
    pub fn new<S: Into<String>>(endpoint: S) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl PdfRenderer for HttpPdfRenderer {
    async fn render(&self, title: &str, content: &str) -> ToolResult<Vec<u8>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({"title": title, "content": content}))
            .send()
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionError(format!(
                "pdf rendering failed: {} - {}",
                status, body
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Persists artifact HTML through the asset store so the client can open it by URL
pub struct StoredArtifactBuilder {
    storage: Arc<dyn AssetStore>,
}

impl StoredArtifactBuilder {
    pub fn new(storage: Arc<dyn AssetStore>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ArtifactBuilder for StoredArtifactBuilder {
    async fn create(
        &self,
        title: &str,
        html: &str,
        artifact_type: &str,
    ) -> ToolResult<ArtifactDescriptor> {
        if html.trim().is_empty() {
            return Err(ToolError::InvalidParameters("artifact html is empty".into()));
        }
        let artifact_id = Uuid::new_v4().to_string();
        let url = self
            .storage
            .store(html.as_bytes().to_vec(), &format!("artifact-{}.html", artifact_id))
            .await?;

        Ok(ArtifactDescriptor {
            artifact_id,
            title: title.to_string(),
            artifact_type: artifact_type.to_string(),
            url,
        })
    }
}
