// Request/response shapes of the upstream Responses API

pub mod models;
pub mod image_result;

pub use image_result::{classify_record, extract_completed_image, CompletedImage, PartialImage, StreamEvent};
pub use models::{requests_image_generation, wants_stream, ImageGenerationRequest, ImageGenerationTool};
