use chrono::Utc;
use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use uuid::Uuid;

use crate::collaborators::{
    extension_for, AssetOperation, Collaborators, GeneratedAsset, GeneratedImage,
};
use crate::errors::{ToolError, ToolResult};
use crate::events::{EventSink, OutboundEvent};
use crate::models::tool::{
    ArtifactCreateArgs, ImageEditArgs, ImageGenerateArgs, PdfGenerateArgs, ToolInvocation,
    ToolName, MAX_IMAGE_COUNT,
};

/// What happened to one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    /// Image assets were added to the turn's aggregated result
    Assets { tool_call_id: String, count: usize },
    /// A result event was emitted for this call
    Completed { tool_call_id: String },
    Failed {
        tool_call_id: String,
        tool_name: String,
        message: String,
    },
    /// Nothing to run locally (provider native or unknown tools)
    Skipped { tool_call_id: String },
}

/// Runs a turn's tool invocations against their collaborators.
///
/// Invocations run one after another in the order the model emitted them, so each
/// call's events are written before the next call starts. A failing call is reported
/// on its own and never stops the rest of the turn.
#[derive(Clone)]
pub struct ToolCoordinator {
    collaborators: Collaborators,
}

impl ToolCoordinator {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    pub async fn execute(
        &self,
        invocations: Vec<ToolInvocation>,
        sink: &EventSink,
    ) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(invocations.len());
        let mut assets: Vec<GeneratedAsset> = Vec::new();
        let mut image_tool: Option<String> = None;

        for invocation in invocations {
            if sink.is_closed() {
                tracing::info!("Client disconnected, not starting {}", invocation.name);
                break;
            }
            let tool_call_id = invocation.id.clone();

            let outcome = match &invocation.name {
                ToolName::WebSearch => ToolOutcome::Skipped { tool_call_id },
                ToolName::Unknown(name) => {
                    tracing::info!("No local handler for tool {}, skipping", name);
                    ToolOutcome::Skipped { tool_call_id }
                }
                ToolName::ImageGenerate | ToolName::ImageEdit => {
                    match guarded(self.run_image(&invocation)).await {
                        Ok(new_assets) => {
                            image_tool.get_or_insert_with(|| invocation.name.to_string());
                            let count = new_assets.len();
                            assets.extend(new_assets);
                            ToolOutcome::Assets {
                                tool_call_id,
                                count,
                            }
                        }
                        Err(e) => report_failure(sink, &invocation, e).await,
                    }
                }
                ToolName::PdfGenerate | ToolName::ArtifactCreate => {
                    let result = if invocation.name == ToolName::PdfGenerate {
                        guarded(self.run_pdf(&invocation)).await
                    } else {
                        guarded(self.run_artifact(&invocation)).await
                    };
                    match result {
                        Ok(payload) => {
                            deliver(
                                sink,
                                OutboundEvent::ToolResult {
                                    tool_name: invocation.name.to_string(),
                                    payload,
                                },
                            )
                            .await;
                            ToolOutcome::Completed { tool_call_id }
                        }
                        Err(e) => report_failure(sink, &invocation, e).await,
                    }
                }
            };
            outcomes.push(outcome);
        }

        // one result for every image call in the turn, so none can replace another client side
        if let Some(tool_name) = image_tool {
            tracing::info!("Reporting {} generated assets", assets.len());
            deliver(
                sink,
                OutboundEvent::ToolResult {
                    tool_name,
                    payload: json!({ "assets": assets }),
                },
            )
            .await;
        }

        outcomes
    }

    async fn run_image(&self, invocation: &ToolInvocation) -> ToolResult<Vec<GeneratedAsset>> {
        let images = &self.collaborators.images;
        match invocation.name {
            ToolName::ImageEdit => {
                let args: ImageEditArgs = parse_args(invocation)?;
                let image = images.edit(&args.image_url, &args.instruction).await?;
                let asset = self
                    .store_image(
                        image,
                        AssetOperation::Edit,
                        &args.instruction,
                        Some(args.image_url.clone()),
                    )
                    .await?;
                Ok(vec![asset])
            }
            _ => {
                let args: ImageGenerateArgs = parse_args(invocation)?;
                if !(1..=MAX_IMAGE_COUNT).contains(&args.count) {
                    return Err(ToolError::InvalidParameters(format!(
                        "{}: count must be between 1 and {}, got {}",
                        invocation.name, MAX_IMAGE_COUNT, args.count
                    )));
                }
                let generated = images
                    .generate(&args.prompt, args.count, args.aspect_ratio.as_deref())
                    .await?;
                if generated.is_empty() {
                    return Err(ToolError::ExecutionError("no images were generated".into()));
                }
                let stores = generated.into_iter().map(|image| {
                    self.store_image(image, AssetOperation::Generate, &args.prompt, None)
                });
                futures::future::try_join_all(stores).await
            }
        }
    }

    async fn store_image(
        &self,
        image: GeneratedImage,
        operation: AssetOperation,
        prompt: &str,
        original_url: Option<String>,
    ) -> ToolResult<GeneratedAsset> {
        let asset_id = Uuid::new_v4().to_string();
        let filename = format!("{}.{}", asset_id, extension_for(&image.mime_type));
        let storage_url = self
            .collaborators
            .storage
            .store(image.bytes, &filename)
            .await?;

        Ok(GeneratedAsset {
            asset_id,
            storage_url,
            model_name: self.collaborators.images.model_name().to_string(),
            operation,
            prompt: prompt.to_string(),
            timestamp: Utc::now(),
            original_url,
            mime_type: image.mime_type,
        })
    }

    async fn run_pdf(&self, invocation: &ToolInvocation) -> ToolResult<Value> {
        let args: PdfGenerateArgs = parse_args(invocation)?;
        let bytes = self
            .collaborators
            .pdf
            .render(&args.title, &args.content)
            .await?;
        let size_bytes = bytes.len();
        let filename = format!("{}-{}.pdf", slug(&args.title), Uuid::new_v4());
        let url = self.collaborators.storage.store(bytes, &filename).await?;

        Ok(json!({
            "title": args.title,
            "filename": filename,
            "url": url,
            "sizeBytes": size_bytes,
        }))
    }

    async fn run_artifact(&self, invocation: &ToolInvocation) -> ToolResult<Value> {
        let args: ArtifactCreateArgs = parse_args(invocation)?;
        let descriptor = self
            .collaborators
            .artifacts
            .create(&args.title, &args.html, &args.artifact_type)
            .await?;
        serde_json::to_value(descriptor).map_err(|e| ToolError::Other(e.into()))
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(invocation: &ToolInvocation) -> ToolResult<T> {
    invocation
        .parse_arguments()
        .map_err(|e| ToolError::InvalidParameters(format!("{}: {}", invocation.name, e)))
}

/// Turn a panic inside a collaborator into an ordinary tool error.
async fn guarded<T, F>(future: F) -> ToolResult<T>
where
    F: Future<Output = ToolResult<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(ToolError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn report_failure(
    sink: &EventSink,
    invocation: &ToolInvocation,
    error: ToolError,
) -> ToolOutcome {
    tracing::error!("{} ({}) failed: {}", invocation.name, invocation.id, error);
    let message = format!("{} failed: {}", invocation.name, error);
    if sink
        .emit_tool_error(invocation.name.as_wire(), &invocation.id, message.clone())
        .await
        .is_err()
    {
        tracing::debug!("Dropping tool error for disconnected client");
    }
    ToolOutcome::Failed {
        tool_call_id: invocation.id.clone(),
        tool_name: invocation.name.to_string(),
        message,
    }
}

async fn deliver(sink: &EventSink, event: OutboundEvent) {
    if sink.emit(event).await.is_err() {
        tracing::debug!("Discarding tool result for disconnected client");
    }
}

fn slug(title: &str) -> String {
    let slug: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.chars().take(48).collect()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::collaborators::{
        ArtifactBuilder, ArtifactDescriptor, AssetStore, ImageGenerator, PdfRenderer,
    };
    use async_trait::async_trait;
    use serde_json::Map;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Image back end that fails or panics on chosen prompts
    #[derive(Default)]
    pub struct FakeImages {
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ImageGenerator for FakeImages {
        fn model_name(&self) -> &str {
            "fake-image"
        }

        async fn generate(
            &self,
            prompt: &str,
            count: u8,
            _aspect_ratio: Option<&str>,
        ) -> ToolResult<Vec<GeneratedImage>> {
            self.calls.lock().unwrap().push(prompt.to_string());
            match prompt {
                "fail" => Err(ToolError::ExecutionError("backend down".into())),
                "panic" => panic!("image backend exploded"),
                _ => Ok((0..count)
                    .map(|_| GeneratedImage {
                        bytes: prompt.as_bytes().to_vec(),
                        mime_type: "image/png".into(),
                    })
                    .collect()),
            }
        }

        async fn edit(&self, source_url: &str, _instruction: &str) -> ToolResult<GeneratedImage> {
            self.calls.lock().unwrap().push(source_url.to_string());
            Ok(GeneratedImage {
                bytes: b"edited".to_vec(),
                mime_type: "image/webp".into(),
            })
        }
    }

    #[derive(Default)]
    pub struct MemoryStore {
        pub files: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AssetStore for MemoryStore {
        async fn store(&self, _bytes: Vec<u8>, filename: &str) -> ToolResult<String> {
            self.files.lock().unwrap().push(filename.to_string());
            Ok(format!("https://cdn.test/{}", filename))
        }
    }

    pub struct FakePdf;

    #[async_trait]
    impl PdfRenderer for FakePdf {
        async fn render(&self, title: &str, _content: &str) -> ToolResult<Vec<u8>> {
            if title == "fail" {
                return Err(ToolError::ExecutionError("renderer offline".into()));
            }
            Ok(b"%PDF".to_vec())
        }
    }

    pub struct FakeArtifacts;

    #[async_trait]
    impl ArtifactBuilder for FakeArtifacts {
        async fn create(
            &self,
            title: &str,
            _html: &str,
            artifact_type: &str,
        ) -> ToolResult<ArtifactDescriptor> {
            Ok(ArtifactDescriptor {
                artifact_id: "art-1".into(),
                title: title.into(),
                artifact_type: artifact_type.into(),
                url: "https://cdn.test/art-1.html".into(),
            })
        }
    }

    pub fn fake_collaborators() -> (Collaborators, Arc<FakeImages>) {
        let images = Arc::new(FakeImages::default());
        let collaborators = Collaborators {
            images: images.clone(),
            storage: Arc::new(MemoryStore::default()),
            pdf: Arc::new(FakePdf),
            artifacts: Arc::new(FakeArtifacts),
        };
        (collaborators, images)
    }

    pub fn invocation(id: &str, name: &str, arguments: Value) -> ToolInvocation {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        ToolInvocation::new(id, ToolName::from_wire(name), arguments)
    }

    async fn run(invocations: Vec<ToolInvocation>) -> (Vec<ToolOutcome>, Vec<Value>) {
        let (collaborators, _) = fake_collaborators();
        let coordinator = ToolCoordinator::new(collaborators);
        let (tx, mut rx) = mpsc::channel(32);
        let sink = EventSink::new("req", tx);

        let outcomes = coordinator.execute(invocations, &sink).await;
        drop(sink);

        let mut events = Vec::new();
        while let Some(line) = rx.recv().await {
            events.push(serde_json::from_str(line.trim_end()).unwrap());
        }
        (outcomes, events)
    }

    #[tokio::test]
    async fn test_image_calls_collapse_into_one_result() {
        let (outcomes, events) = run(vec![
            invocation("c1", "generate_image", json!({"prompt": "a cat"})),
            invocation("c2", "generate_image", json!({"prompt": "a dog"})),
        ])
        .await;

        assert_eq!(outcomes.len(), 2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "tool-result");
        assert_eq!(events[0]["toolName"], "generate_image");
        let assets = events[0]["payload"]["assets"].as_array().unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0]["prompt"], "a cat");
        assert_eq!(assets[1]["prompt"], "a dog");
        assert_eq!(assets[0]["operation"], "generate");
        assert_eq!(assets[0]["modelName"], "fake-image");
    }

    #[tokio::test]
    async fn test_generate_and_edit_share_result() {
        let (_, events) = run(vec![
            invocation("c1", "generate_image", json!({"prompt": "a cat", "count": 2})),
            invocation(
                "c2",
                "edit_image",
                json!({"image_url": "https://cdn.test/cat.png", "instruction": "add a hat"}),
            ),
        ])
        .await;

        assert_eq!(events.len(), 1);
        let assets = events[0]["payload"]["assets"].as_array().unwrap();
        assert_eq!(assets.len(), 3);
        assert_eq!(assets[2]["operation"], "edit");
        assert_eq!(assets[2]["originalUrl"], "https://cdn.test/cat.png");
        assert_eq!(assets[2]["mimeType"], "image/webp");
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let (outcomes, events) = run(vec![
            invocation("c1", "generate_pdf", json!({"title": "Report", "content": "x"})),
            invocation("c2", "generate_image", json!({"prompt": "fail"})),
            invocation("c3", "create_artifact", json!({"title": "Clock", "html": "<p/>"})),
        ])
        .await;

        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], ToolOutcome::Completed { .. }));
        assert!(matches!(outcomes[1], ToolOutcome::Failed { .. }));
        assert!(matches!(outcomes[2], ToolOutcome::Completed { .. }));

        let kinds: Vec<_> = events.iter().map(|e| e["type"].clone()).collect();
        assert_eq!(kinds, vec!["tool-result", "error", "tool-result"]);
        assert_eq!(events[1]["toolName"], "generate_image");
        assert_eq!(events[1]["toolCallId"], "c2");
        assert!(events[1]["message"].as_str().unwrap().contains("backend down"));
        assert_eq!(events[2]["payload"]["artifactId"], "art-1");
    }

    #[tokio::test]
    async fn test_panicking_collaborator_is_contained() {
        let (outcomes, events) = run(vec![
            invocation("c1", "generate_image", json!({"prompt": "panic"})),
            invocation("c2", "generate_image", json!({"prompt": "a cat"})),
        ])
        .await;

        match &outcomes[0] {
            ToolOutcome::Failed { message, .. } => {
                assert!(message.contains("image backend exploded"))
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "error");
        assert_eq!(events[1]["payload"]["assets"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_scoped_errors() {
        let (outcomes, events) = run(vec![invocation("c1", "generate_pdf", json!({}))]).await;
        assert!(matches!(outcomes[0], ToolOutcome::Failed { .. }));
        assert!(events[0]["message"]
            .as_str()
            .unwrap()
            .contains("Invalid parameters"));
    }

    #[tokio::test]
    async fn test_image_count_out_of_range_is_rejected() {
        let (collaborators, images) = fake_collaborators();
        let coordinator = ToolCoordinator::new(collaborators);
        let (tx, mut rx) = mpsc::channel(8);
        let sink = EventSink::new("req", tx);

        let outcomes = coordinator
            .execute(
                vec![
                    invocation("c1", "generate_image", json!({"prompt": "x", "count": 200})),
                    invocation("c2", "generate_image", json!({"prompt": "y", "count": 0})),
                    invocation("c3", "generate_image", json!({"prompt": "z", "count": 4})),
                ],
                &sink,
            )
            .await;
        drop(sink);

        assert!(matches!(outcomes[0], ToolOutcome::Failed { .. }));
        assert!(matches!(outcomes[1], ToolOutcome::Failed { .. }));
        assert_eq!(
            outcomes[2],
            ToolOutcome::Assets {
                tool_call_id: "c3".into(),
                count: 4
            }
        );
        // rejected calls never reach the image back end
        assert_eq!(*images.calls.lock().unwrap(), vec!["z".to_string()]);

        let first: Value = serde_json::from_str(rx.recv().await.unwrap().trim_end()).unwrap();
        assert_eq!(first["type"], "error");
        assert_eq!(first["toolCallId"], "c1");
        assert!(first["message"].as_str().unwrap().contains("between 1 and 4"));
    }

    #[tokio::test]
    async fn test_search_and_unknown_tools_are_skipped() {
        let (outcomes, events) = run(vec![
            invocation("c1", "web_search", json!({"query": "rust"})),
            invocation("c2", "code_execution", json!({})),
        ])
        .await;
        assert!(outcomes
            .iter()
            .all(|o| matches!(o, ToolOutcome::Skipped { .. })));
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_client_stops_remaining_calls() {
        let (collaborators, images) = fake_collaborators();
        let coordinator = ToolCoordinator::new(collaborators);
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let sink = EventSink::new("req", tx);

        let outcomes = coordinator
            .execute(
                vec![invocation("c1", "generate_image", json!({"prompt": "a cat"}))],
                &sink,
            )
            .await;
        assert!(outcomes.is_empty());
        assert!(images.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Quarterly Report: Q3"), "quarterly-report--q3");
        assert_eq!(slug("!!!"), "document");
    }
}
