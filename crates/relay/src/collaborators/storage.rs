use async_trait::async_trait;
use std::path::PathBuf;

use super::AssetStore;
use crate::errors::{ToolError, ToolResult};

/// Writes assets to a local directory that the server exposes under `public_base_url`
#[derive(Debug, Clone)]
pub struct FsAssetStore {
    dir: PathBuf,
    public_base_url: String,
}

impl FsAssetStore {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(dir: P, public_base_url: S) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.into(),
        }
    }
}

fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    cleaned.trim_start_matches('.').to_string()
}

#[async_trait]
impl AssetStore for FsAssetStore {
    async fn store(&self, bytes: Vec<u8>, filename: &str) -> ToolResult<String> {
        let filename = sanitize_filename(filename);
        if filename.is_empty() {
            return Err(ToolError::InvalidParameters("empty asset filename".into()));
        }
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("creating asset dir: {}", e)))?;
        let path = self.dir.join(&filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| ToolError::ExecutionError(format!("writing {}: {}", path.display(), e)))?;

        tracing::debug!("Stored asset at {}", path.display());
        Ok(format!(
            "{}/{}",
            self.public_base_url.trim_end_matches('/'),
            filename
        ))
    }
}
