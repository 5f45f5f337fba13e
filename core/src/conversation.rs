//! Client-side conversation chaining
//!
//! The proxy keeps no history between turns. A client remembers the id of the
//! last completed response and sends it back as `previous_response_id` so the
//! upstream can edit the previous image instead of starting over.

use serde_json::Value;

use crate::proxy::mappers::image_result::CompletedImage;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationState {
    previous_response_id: Option<String>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue from a response id obtained earlier
    pub fn resume(response_id: impl Into<String>) -> Self {
        Self {
            previous_response_id: Some(response_id.into()),
        }
    }

    pub fn previous_response_id(&self) -> Option<&str> {
        self.previous_response_id.as_deref()
    }

    /// Set `previous_response_id` on an outgoing request body, if we have one
    pub fn apply(&self, body: &mut Value) {
        if let (Some(id), Some(obj)) = (&self.previous_response_id, body.as_object_mut()) {
            obj.insert("previous_response_id".to_string(), Value::String(id.clone()));
        }
    }

    /// Remember the id of a finished turn. A completion without an id ends the chain.
    pub fn record(&mut self, completed: &CompletedImage) {
        self.previous_response_id = completed.response_id.clone();
    }

    pub fn reset(&mut self) {
        self.previous_response_id = None;
    }
}
