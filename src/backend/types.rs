//! Wire shapes shared by the backend endpoints

use serde::Deserialize;

/// Some endpoints answer `{"data": ...}`, others the bare object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(value) => value,
        }
    }
}

/// Error payload, whichever of the usual keys the backend filled in
#[derive(Debug, Default, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    /// Best human-readable message for a failed response body
    pub fn message_from(body: &str) -> String {
        match serde_json::from_str::<ErrorBody>(body) {
            Ok(parsed) => parsed
                .message
                .or(parsed.detail)
                .or(parsed.error)
                .unwrap_or_else(|| body.to_string()),
            Err(_) => body.trim().to_string(),
        }
    }
}

/// Endpoint paths, relative to the configured base URL
pub mod paths {
    pub fn agent_status(agent_id: &str) -> String {
        format!("/agents/{}/status", agent_id)
    }

    pub const VOICE_SETTINGS: &str = "/voice/settings";
    pub const CALL_HISTORY: &str = "/voice/calls";
    pub const QUEUES: &str = "/voice/queues";
    pub const CALLBACKS: &str = "/voice/callbacks";

    pub fn queue_agents(queue_id: &str) -> String {
        format!("/voice/queues/{}/agents", queue_id)
    }

    pub fn complete_callback(callback_id: &str) -> String {
        format!("/voice/callbacks/{}/complete", callback_id)
    }
}
