//! Classification of upstream events and extraction of the generated image

use serde::Serialize;
use serde_json::Value;

pub const PARTIAL_IMAGE_EVENT: &str = "response.image_generation_call.partial_image";
pub const COMPLETED_EVENT: &str = "response.completed";
/// `output` item type holding the finished image
pub const IMAGE_GENERATION_CALL: &str = "image_generation_call";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartialImage {
    pub index: u32,
    pub image_b64: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedImage {
    /// Chain the next turn by sending this as `previous_response_id`
    pub response_id: Option<String>,
    pub image_b64: String,
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    PartialImage(PartialImage),
    /// `None` when the response finished without an image generation result
    Completed(Option<CompletedImage>),
    Other,
}

/// Classify one parsed stream record by its `type` field
pub fn classify_record(record: &Value) -> StreamEvent {
    match record.get("type").and_then(|v| v.as_str()) {
        Some(PARTIAL_IMAGE_EVENT) => {
            let index = record
                .get("partial_image_index")
                .and_then(|v| v.as_u64())
                .and_then(|i| u32::try_from(i).ok());
            let image = record.get("partial_image_b64").and_then(|v| v.as_str());

            match (index, image) {
                (Some(index), Some(image)) => StreamEvent::PartialImage(PartialImage {
                    index,
                    image_b64: image.to_string(),
                }),
                _ => {
                    tracing::warn!("Partial image event without index or payload");
                    StreamEvent::Other
                }
            }
        }
        Some(COMPLETED_EVENT) => {
            let response = record.get("response").unwrap_or(&Value::Null);
            StreamEvent::Completed(extract_completed_image(response))
        }
        _ => StreamEvent::Other,
    }
}

/// Find the first `image_generation_call` item in a response's `output` list
pub fn extract_completed_image(response: &Value) -> Option<CompletedImage> {
    let item = response
        .get("output")
        .and_then(|o| o.as_array())?
        .iter()
        .find(|item| item.get("type").and_then(|v| v.as_str()) == Some(IMAGE_GENERATION_CALL))?;

    let image_b64 = item
        .get("result")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())?;

    Some(CompletedImage {
        response_id: response.get("id").and_then(|v| v.as_str()).map(str::to_string),
        image_b64: image_b64.to_string(),
        revised_prompt: item
            .get("revised_prompt")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}
