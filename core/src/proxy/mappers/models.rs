//! Request models for the upstream Responses API

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool `type` that marks a request as image generation
pub const IMAGE_GENERATION_TOOL: &str = "image_generation";

/// Whether the body carries an `image_generation` tool descriptor.
/// Only these requests count against the rate limit.
pub fn requests_image_generation(body: &Value) -> bool {
    body.get("tools")
        .and_then(|t| t.as_array())
        .map(|tools| {
            tools.iter().any(|tool| {
                tool.get("type").and_then(|v| v.as_str()) == Some(IMAGE_GENERATION_TOOL)
            })
        })
        .unwrap_or(false)
}

pub fn wants_stream(body: &Value) -> bool {
    body.get("stream").and_then(|v| v.as_bool()).unwrap_or(false)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageGenerationTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    /// `transparent`, `opaque` or `auto`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,
    /// 0-100, only meaningful for jpeg and webp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_compression: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial_images: Option<u8>,
}

impl Default for ImageGenerationTool {
    fn default() -> Self {
        Self {
            tool_type: IMAGE_GENERATION_TOOL.to_string(),
            size: None,
            quality: None,
            background: None,
            output_format: None,
            output_compression: None,
            partial_images: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageGenerationRequest {
    pub model: String,
    pub input: Value,
    pub tools: Vec<ImageGenerationTool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_response_id: Option<String>,
}

impl ImageGenerationRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>, tool: ImageGenerationTool) -> Self {
        Self {
            model: model.into(),
            input: Value::String(prompt.into()),
            tools: vec![tool],
            stream: false,
            previous_response_id: None,
        }
    }

    /// Streams whenever partial frames were asked for
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}
