use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::{GeneratedImage, ImageGenerator};
use crate::errors::{ToolError, ToolResult};
use crate::models::tool::MAX_IMAGE_COUNT;

pub const OPENAI_IMAGES_HOST: &str = "https://api.openai.com";
pub const DEFAULT_IMAGE_MODEL: &str = "gpt-image-1";

#[derive(Debug, Clone)]
pub struct ImageProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

/// Image generation and editing through the OpenAI images API
pub struct OpenAiImageGenerator {
    client: Client,
    config: ImageProviderConfig,
}

impl OpenAiImageGenerator {
    pub fn new(config: ImageProviderConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/images/{}", self.config.host.trim_end_matches('/'), path)
    }

    async fn generate_one(&self, prompt: &str, size: &str) -> ToolResult<GeneratedImage> {
        let payload = json!({
            "model": self.config.model,
            "prompt": prompt,
            "n": 1,
            "size": size,
        });
        let response = self
            .client
            .post(self.url("generations"))
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        first_image(read_json(response).await?)
    }

    async fn fetch_source(&self, source_url: &str) -> ToolResult<(Vec<u8>, String)> {
        let response = self
            .client
            .get(source_url)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionError(format!("fetching source image: {}", e)))?;
        if !response.status().is_success() {
            return Err(ToolError::ExecutionError(format!(
                "fetching source image failed: {}",
                response.status()
            )));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;
        Ok((bytes.to_vec(), mime_type))
    }
}

/// Map the aspect ratios the tool schema allows onto API sizes
fn size_for(aspect_ratio: Option<&str>) -> &'static str {
    match aspect_ratio {
        Some("16:9") => "1536x1024",
        Some("9:16") => "1024x1536",
        _ => "1024x1024",
    }
}

async fn read_json(response: reqwest::Response) -> ToolResult<Value> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ToolError::ExecutionError(format!(
            "image request failed: {} - {}",
            status, body
        )));
    }
    response
        .json()
        .await
        .map_err(|e| ToolError::ExecutionError(format!("invalid image response: {}", e)))
}

fn first_image(response: Value) -> ToolResult<GeneratedImage> {
    let encoded = response["data"][0]["b64_json"]
        .as_str()
        .ok_or_else(|| ToolError::ExecutionError("image response had no data".into()))?;
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| ToolError::ExecutionError(format!("invalid image payload: {}", e)))?;
    Ok(GeneratedImage {
        bytes,
        mime_type: "image/png".to_string(),
    })
}

#[async_trait]
impl ImageGenerator for OpenAiImageGenerator {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn generate(
        &self,
        prompt: &str,
        count: u8,
        aspect_ratio: Option<&str>,
    ) -> ToolResult<Vec<GeneratedImage>> {
        let size = size_for(aspect_ratio);
        // variations are independent, so request them concurrently and report them together
        let requests =
            (0..count.clamp(1, MAX_IMAGE_COUNT)).map(|_| self.generate_one(prompt, size));
        futures::future::try_join_all(requests).await
    }

    async fn edit(&self, source_url: &str, instruction: &str) -> ToolResult<GeneratedImage> {
        let (source, mime_type) = self.fetch_source(source_url).await?;
        let image = Part::bytes(source)
            .file_name(format!("source.{}", super::extension_for(&mime_type)))
            .mime_str(&mime_type)
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;
        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("prompt", instruction.to_string())
            .part("image", image);

        let response = self
            .client
            .post(self.url("edits"))
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))?;

        first_image(read_json(response).await?)
    }
}
