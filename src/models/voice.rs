// src/models/voice.rs
use crate::models::call::CallDirection;
use crate::models::agent::AgentStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Per-entity voice configuration served by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VoiceSettings {
    /// After-Call-Work length; zero disables ACW
    #[serde(default)]
    pub acw_timeout_seconds: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webrtc_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
    #[serde(default)]
    pub recording_enabled: bool,
}

impl VoiceSettings {
    pub fn with_acw(acw_timeout_seconds: u32) -> Self {
        Self {
            acw_timeout_seconds,
            webrtc_token: None,
            caller_id: None,
            recording_enabled: false,
        }
    }
}

/// One row of the agent's call history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub id: String,
    pub direction: CallDirection,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub status: String,
    #[serde(default)]
    pub duration_seconds: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page as u64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub waiting_calls: u32,
    #[serde(default)]
    pub available_agents: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longest_wait_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueAgent {
    pub agent_id: String,
    pub name: String,
    pub status: AgentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Callback {
    pub id: String,
    pub phone_number: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateCallbackRequest {
    #[validate(custom(function = "validate_phone_number"))]
    pub phone_number: String,

    #[validate(length(max = 100, message = "Contact name is too long"))]
    pub contact_name: Option<String>,

    #[validate(length(max = 500, message = "Notes must be at most 500 characters"))]
    pub notes: Option<String>,

    pub scheduled_for: DateTime<Utc>,
}

/// Dialable numbers: optional leading `+`, then 3 to 20 digits.
/// Spaces, dashes and parentheses are tolerated as separators.
pub fn validate_phone_number(value: &str) -> Result<(), ValidationError> {
    let trimmed = value.trim();
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);

    let mut count = 0;
    for c in digits.chars() {
        match c {
            '0'..='9' => count += 1,
            ' ' | '-' | '(' | ')' => {}
            _ => return Err(ValidationError::new("invalid_phone_number")),
        }
    }

    if !(3..=20).contains(&count) {
        return Err(ValidationError::new("invalid_phone_number"));
    }
    Ok(())
}

/// Strips separators so the SDK gets `+digits` only
pub fn normalize_phone_number(value: &str) -> String {
    let trimmed = value.trim();
    let mut out = String::with_capacity(trimmed.len());
    if trimmed.starts_with('+') {
        out.push('+');
    }
    out.extend(trimmed.chars().filter(|c| c.is_ascii_digit()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_validation() {
        assert!(validate_phone_number("+254 700 000-001").is_ok());
        assert!(validate_phone_number("1000").is_ok());
        assert!(validate_phone_number("12").is_err());
        assert!(validate_phone_number("call-me").is_err());
        assert!(validate_phone_number("").is_err());
    }

    #[test]
    fn test_normalize_phone_number() {
        assert_eq!(normalize_phone_number(" +254 (700) 000-001 "), "+254700000001");
        assert_eq!(normalize_phone_number("1000"), "1000");
    }

    #[test]
    fn test_callback_request_validation() {
        let request = CreateCallbackRequest {
            phone_number: "abc".to_string(),
            contact_name: None,
            notes: Some("x".repeat(501)),
            scheduled_for: Utc::now(),
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("phone_number"));
        assert!(fields.contains_key("notes"));
    }

    #[test]
    fn test_settings_defaults() {
        let settings: VoiceSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings.acw_timeout_seconds, 0);
        assert!(!settings.recording_enabled);
    }

    #[test]
    fn test_total_pages() {
        let page: Page<CallLogEntry> = Page { data: vec![], page: 1, per_page: 20, total: 41 };
        assert_eq!(page.total_pages(), 3);
    }
}
