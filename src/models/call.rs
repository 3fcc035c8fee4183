// src/models/call.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Softphone call lifecycle state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Initializing,
    Dialing,
    Ringing,
    Connected,
    OnHold,
    Ended,
    Error,
}

impl CallState {
    pub fn as_str(&self) -> &str {
        match self {
            CallState::Idle => "idle",
            CallState::Initializing => "initializing",
            CallState::Dialing => "dialing",
            CallState::Ringing => "ringing",
            CallState::Connected => "connected",
            CallState::OnHold => "on_hold",
            CallState::Ended => "ended",
            CallState::Error => "error",
        }
    }

    /// States in which an `ActiveCall` exists and the agent is busy.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            CallState::Dialing | CallState::Ringing | CallState::Connected | CallState::OnHold
        )
    }

    /// States in which call audio is flowing (mute/hold apply).
    pub fn is_talking(&self) -> bool {
        matches!(self, CallState::Connected | CallState::OnHold)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    pub fn as_str(&self) -> &str {
        match self {
            CallDirection::Inbound => "inbound",
            CallDirection::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActiveCall {
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub direction: CallDirection,
    /// Seconds since the call connected
    pub duration: u64,
    /// SDK call identifier; the backend call log is keyed by it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_log_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ActiveCall {
    pub fn outbound(phone_number: String, contact_name: Option<String>) -> Self {
        Self {
            phone_number,
            contact_name,
            direction: CallDirection::Outbound,
            duration: 0,
            call_log_id: None,
            started_at: Utc::now(),
        }
    }

    pub fn from_incoming(incoming: IncomingCall) -> Self {
        Self {
            phone_number: incoming.caller_number,
            contact_name: incoming.caller_name,
            direction: CallDirection::Inbound,
            duration: 0,
            call_log_id: Some(incoming.call_id),
            started_at: Utc::now(),
        }
    }

    /// `mm:ss`, or `h:mm:ss` past the hour
    pub fn formatted_duration(&self) -> String {
        let hours = self.duration / 3600;
        let minutes = (self.duration % 3600) / 60;
        let seconds = self.duration % 60;
        if hours > 0 {
            format!("{}:{:02}:{:02}", hours, minutes, seconds)
        } else {
            format!("{:02}:{:02}", minutes, seconds)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncomingCall {
    pub call_id: String,
    pub caller_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caller_name: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// What the UI keeps showing while the state is `ended`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndedCall {
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_name: Option<String>,
    pub direction: CallDirection,
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_log_id: Option<String>,
    pub reason: String,
    pub ended_at: DateTime<Utc>,
}

impl EndedCall {
    pub fn from_active(call: ActiveCall, reason: impl Into<String>) -> Self {
        Self {
            phone_number: call.phone_number,
            contact_name: call.contact_name,
            direction: call.direction,
            duration: call.duration,
            call_log_id: call.call_log_id,
            reason: reason.into(),
            ended_at: Utc::now(),
        }
    }
}
