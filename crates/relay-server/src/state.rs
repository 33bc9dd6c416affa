use anyhow::Result;
use relay::auth::{AuthResolver, StaticTokenResolver};
use relay::collaborators::documents::{HttpPdfRenderer, StoredArtifactBuilder};
use relay::collaborators::images::OpenAiImageGenerator;
use relay::collaborators::storage::FsAssetStore;
use relay::collaborators::{
    AssetStore, Collaborators, ImageGenerator, PdfRenderer, Unconfigured,
};
use relay::coordinator::ToolCoordinator;
use relay::providers::base::Provider;
use relay::providers::factory::{self, ProviderType};
use relay::turn::Orchestrator;
use std::collections::HashMap;
use std::sync::Arc;

use crate::configuration::Settings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    providers: HashMap<ProviderType, Arc<dyn Provider>>,
    auth: Arc<dyn AuthResolver>,
    coordinator: ToolCoordinator,
}

impl AppState {
    pub fn new(auth: Arc<dyn AuthResolver>, coordinator: ToolCoordinator) -> Self {
        Self {
            providers: HashMap::new(),
            auth,
            coordinator,
        }
    }

    pub fn with_provider(mut self, provider_type: ProviderType, provider: Arc<dyn Provider>) -> Self {
        self.providers.insert(provider_type, provider);
        self
    }

    /// Build every provider and collaborator the configuration describes
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let auth = StaticTokenResolver::parse(settings.auth.tokens.as_deref().unwrap_or_default())?;
        tracing::info!("Loaded {} auth tokens", auth.len());

        let storage: Arc<dyn AssetStore> = Arc::new(FsAssetStore::new(
            settings.storage.dir.clone(),
            settings.storage.public_base_url.clone(),
        ));
        let images: Arc<dyn ImageGenerator> = match settings.images.config() {
            Some(config) => Arc::new(OpenAiImageGenerator::new(config)?),
            None => {
                tracing::warn!("No image API key configured, image tools will fail");
                Arc::new(Unconfigured("image generation"))
            }
        };
        let pdf: Arc<dyn PdfRenderer> = match settings.pdf.endpoint.as_deref() {
            Some(endpoint) => Arc::new(HttpPdfRenderer::new(endpoint)?),
            None => {
                tracing::warn!("No pdf endpoint configured, pdf export will fail");
                Arc::new(Unconfigured("pdf rendering"))
            }
        };
        let collaborators = Collaborators {
            images,
            pdf,
            artifacts: Arc::new(StoredArtifactBuilder::new(storage.clone())),
            storage,
        };

        let state = Self::new(Arc::new(auth), ToolCoordinator::new(collaborators))
            .with_provider(
                ProviderType::Anthropic,
                factory::get_provider(settings.anthropic.into_config())?,
            )
            .with_provider(
                ProviderType::OpenAi,
                factory::get_provider(settings.openai.into_config())?,
            );
        Ok(state)
    }

    /// A fresh orchestrator for one turn against `provider_type`, if it is routable
    pub fn orchestrator(&self, provider_type: ProviderType) -> Option<Orchestrator> {
        let provider = self.providers.get(&provider_type)?;
        Some(Orchestrator::new(
            self.auth.clone(),
            provider.clone(),
            self.coordinator.clone(),
        ))
    }
}
