use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::adapter::{adapt, AdaptedArguments, ArgValue, ParameterBag};
use crate::chain::{run_chain_with_report, ChainSpec, StageReport};
use crate::codec::{decode_wire_image, encode_preview_image, encode_wire_image, CodecError, ImageTensor};
use crate::config::BridgeSettings;
use crate::fallback::{apply_fallback, FallbackOptions};
use crate::host::{
    HostNode, InputSchema, InputSpec, LoadedModule, NodeError, NodeOutput, NodeRegistry,
};
use crate::invoke::invoke_and_normalize;
use crate::notify::{PreviewNotifier, PreviewUpdate};
use crate::registry::NodeResolver;

pub const IMAGE_PREVIEW_NODE: &str = "ImagePreviewNode";
pub const IMAGE_PREVIEW_MODULE: &str = "custom_nodes.image_preview";
const PREVIEW_FUNCTION: &str = "preview";

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("{0}")]
    Codec(#[from] CodecError),
    #[error("node chain is empty")]
    EmptyChain,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProcessRequest {
    #[serde(default)]
    pub image_data: Value,
    #[serde(default, deserialize_with = "params_or_empty")]
    pub params: ParameterBag,
    #[serde(default, deserialize_with = "string_or_empty")]
    pub node_type: String,
    #[serde(flatten)]
    pub echo: SizeEcho,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainRequest {
    #[serde(default)]
    pub image_data: Value,
    #[serde(default, deserialize_with = "chain_or_empty")]
    pub chain: ChainSpec,
    #[serde(flatten)]
    pub echo: SizeEcho,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeEcho {
    #[serde(default)]
    pub original_width: Value,
    #[serde(default)]
    pub original_height: Value,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: Value,
}

impl Default for SizeEcho {
    fn default() -> Self {
        Self {
            original_width: Value::Null,
            original_height: Value::Null,
            scale_factor: default_scale_factor(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewResponse {
    pub success: bool,
    pub image_data: String,
    pub width: usize,
    pub height: usize,
    #[serde(flatten)]
    pub echo: SizeEcho,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<Vec<StageReport>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SingleOutcome {
    Node,
    Fallback { reason: String },
}

#[derive(Debug, Clone)]
pub struct SingleRun {
    pub image: ImageTensor,
    pub outcome: SingleOutcome,
}

pub struct PreviewService {
    resolver: NodeResolver,
    jpeg_quality: u8,
    fallback: FallbackOptions,
}

impl PreviewService {
    pub fn new(resolver: NodeResolver, settings: &BridgeSettings) -> Self {
        Self {
            resolver,
            jpeg_quality: settings.jpeg_quality,
            fallback: settings.fallback,
        }
    }

    pub fn resolver(&self) -> &NodeResolver {
        &self.resolver
    }

    pub fn process_single(
        &self,
        image: &ImageTensor,
        node_type: &str,
        params: &ParameterBag,
    ) -> SingleRun {
        let attempt = self
            .resolver
            .resolve(node_type)
            .map_err(|not_found| not_found.to_string())
            .and_then(|descriptor| {
                let args = adapt(&descriptor, image, params);
                invoke_and_normalize(&descriptor, args).map_err(|failure| failure.to_string())
            });

        match attempt {
            Ok(processed) => {
                info!(
                    node_type,
                    width = processed.width(),
                    height = processed.height(),
                    "node processed preview"
                );
                SingleRun {
                    image: processed,
                    outcome: SingleOutcome::Node,
                }
            }
            Err(reason) => {
                warn!(node_type, %reason, "node unavailable; applying generic fallback");
                SingleRun {
                    image: apply_fallback(image, params, &self.fallback),
                    outcome: SingleOutcome::Fallback { reason },
                }
            }
        }
    }

    pub fn process(&self, request: &ProcessRequest) -> Result<PreviewResponse, PreviewError> {
        let image = decode_request_image(&request.image_data)?;
        let run = self.process_single(&image, request.node_type.as_str(), &request.params);
        self.respond(&run.image, &request.echo)
    }

    pub fn process_chain(&self, request: &ChainRequest) -> Result<PreviewResponse, PreviewError> {
        if request.chain.is_empty() {
            return Err(PreviewError::EmptyChain);
        }
        let image = decode_request_image(&request.image_data)?;
        let run = run_chain_with_report(&self.resolver, image, &request.chain);
        let applied = run.stages.iter().filter(|stage| stage.applied()).count();
        info!(stages = run.stages.len(), applied, "chain processed preview");
        let mut response = self.respond(&run.image, &request.echo)?;
        response.stages = Some(run.stages);
        Ok(response)
    }

    fn respond(&self, image: &ImageTensor, echo: &SizeEcho) -> Result<PreviewResponse, PreviewError> {
        Ok(PreviewResponse {
            success: true,
            image_data: encode_wire_image(image, self.jpeg_quality)?,
            width: image.width(),
            height: image.height(),
            echo: echo.clone(),
            stages: None,
        })
    }
}

fn decode_request_image(image_data: &Value) -> Result<ImageTensor, PreviewError> {
    let payload = image_data.as_str().ok_or(CodecError::UnsupportedPayload)?;
    Ok(decode_wire_image(payload)?)
}

pub struct ImagePreviewNode {
    notifier: Arc<dyn PreviewNotifier>,
    max_edge: u32,
    jpeg_quality: u8,
}

impl ImagePreviewNode {
    pub fn new(notifier: Arc<dyn PreviewNotifier>, max_edge: u32, jpeg_quality: u8) -> Self {
        Self {
            notifier,
            max_edge,
            jpeg_quality,
        }
    }

    fn push(&self, args: &AdaptedArguments) -> Result<usize, String> {
        let image = args.image("image").map_err(|e| e.to_string())?;
        let image_data = encode_preview_image(image, self.max_edge, self.jpeg_quality)
            .map_err(|e| e.to_string())?;
        self.notifier
            .publish(PreviewUpdate {
                node_id: node_id(args),
                image_data,
            })
            .map_err(|e| e.to_string())
    }
}

impl HostNode for ImagePreviewNode {
    fn input_types(&self) -> Option<InputSchema> {
        Some(
            InputSchema::new()
                .required(InputSpec::new("image", "IMAGE"))
                .hidden(InputSpec::new("unique_id", "UNIQUE_ID")),
        )
    }

    fn function(&self) -> Option<String> {
        Some(String::from(PREVIEW_FUNCTION))
    }

    fn has_method(&self, name: &str) -> bool {
        name == PREVIEW_FUNCTION
    }

    fn call(&self, method: &str, args: AdaptedArguments) -> Result<NodeOutput, NodeError> {
        if method != PREVIEW_FUNCTION {
            return Err(NodeError::Failed(format!("no method named '{method}'")));
        }
        if let Err(error) = self.push(&args) {
            warn!(%error, "image preview push failed");
        }
        Ok(NodeOutput::Tuple(Vec::new()))
    }
}

fn node_id(args: &AdaptedArguments) -> Option<String> {
    match args.get("unique_id")? {
        ArgValue::Text(text) => Some(text.clone()),
        ArgValue::Int(id) => Some(id.to_string()),
        ArgValue::Raw(Value::String(text)) => Some(text.clone()),
        ArgValue::Raw(Value::Null) => None,
        ArgValue::Raw(other) => Some(other.to_string()),
        _ => None,
    }
}

pub fn preview_module(notifier: Arc<dyn PreviewNotifier>, settings: &BridgeSettings) -> LoadedModule {
    let node = ImagePreviewNode::new(notifier, settings.preview_max_edge, settings.jpeg_quality);
    let registry = NodeRegistry::new().with_node(IMAGE_PREVIEW_NODE, Arc::new(node));
    LoadedModule::new(IMAGE_PREVIEW_MODULE, Some(registry.into_shared()))
}

fn default_scale_factor() -> Value {
    json!(1.0)
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn params_or_empty<'de, D>(deserializer: D) -> Result<ParameterBag, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ParameterBag>::deserialize(deserializer)?.unwrap_or_default())
}

fn chain_or_empty<'de, D>(deserializer: D) -> Result<ChainSpec, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ChainSpec>::deserialize(deserializer)?.unwrap_or_default())
}
