use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the chat services or carried by a
/// `connection-error` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(alias = "error")]
    pub message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("message is missing its {0}")]
    MissingField(&'static str),
}
