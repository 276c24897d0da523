use serde::{Deserialize, Serialize};

use crate::models::event::FieldError;

pub const INVALID_PAYLOAD: &str = "Invalid request payload";
pub const QUEUE_FAILURE: &str = "Failed to queue event";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackResponse {
    pub status: String,
}

impl TrackResponse {
    pub fn accepted() -> Self {
        Self {
            status: "accepted".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<FieldError>,
}

impl ErrorResponse {
    pub fn invalid_payload(details: Vec<FieldError>) -> Self {
        Self {
            error: INVALID_PAYLOAD.to_string(),
            details,
        }
    }

    pub fn queue_failure() -> Self {
        Self {
            error: QUEUE_FAILURE.to_string(),
            details: Vec::new(),
        }
    }
}
