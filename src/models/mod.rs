// src/models/mod.rs
pub mod agent;
pub mod call;
pub mod voice;

pub use agent::{AgentPresence, AgentStatus, AgentStatusUpdate};
pub use call::{ActiveCall, CallDirection, CallState, EndedCall, IncomingCall};
pub use voice::{
    normalize_phone_number, validate_phone_number, CallLogEntry, Callback,
    CreateCallbackRequest, Page, QueueAgent, QueueSummary, VoiceSettings,
};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

// ==================== Control API DTOs ====================

/// Success envelope of the control API
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self { data, message: None }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            data,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct DialRequest {
    #[validate(custom(function = "validate_phone_number"))]
    pub phone_number: String,
    #[serde(default)]
    #[validate(length(max = 100, message = "Label is too long"))]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct DtmfRequest {
    #[validate(custom(function = "validate_dtmf_digit"))]
    pub digit: String,
}

impl DtmfRequest {
    pub fn digit(&self) -> Option<char> {
        self.digit.chars().next()
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: AgentStatus,
}

#[derive(Debug, Deserialize, Validate)]
pub struct HistoryQuery {
    #[serde(default = "default_page")]
    #[validate(range(min = 1))]
    pub page: u32,
    #[serde(default = "default_per_page")]
    #[validate(range(min = 1, max = 100))]
    pub per_page: u32,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub sdk_ready: bool,
}

/// Keypad symbols accepted as DTMF: `0-9 * # A-D`
pub fn is_dtmf_digit(c: char) -> bool {
    matches!(c, '0'..='9' | '*' | '#' | 'A'..='D')
}

pub fn validate_dtmf_digit(value: &str) -> Result<(), ValidationError> {
    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if is_dtmf_digit(c) => Ok(()),
        _ => Err(ValidationError::new("invalid_dtmf_digit")),
    }
}
