//! Telephony SDK seam
//!
//! The call state client is the only caller of these operations. A binding
//! reports call progress as `SdkEvent`s on the channel returned by
//! `connect()`, one ordered stream per connection.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

pub type SdkEvents = mpsc::Receiver<SdkEvent>;

/// Call lifecycle notifications emitted by a binding
#[derive(Debug, Clone, PartialEq)]
pub enum SdkEvent {
    /// Remote party is being alerted
    Ringing { call_id: String },
    /// Call media is up
    Answered { call_id: String },
    /// New inbound call for the agent
    Incoming {
        call_id: String,
        caller_number: String,
        caller_name: Option<String>,
    },
    /// Caller gave up before the agent answered
    IncomingCancelled { call_id: String },
    /// Call could not be set up
    CallFailed { call_id: String, reason: String },
    /// Call torn down, by either side
    Hangup { call_id: String, cause: String },
    /// Hold confirmed by the switch
    HoldChanged { call_id: String, on_hold: bool },
    /// The SDK connection itself is gone
    Disconnected { reason: String },
}

impl SdkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SdkEvent::Ringing { .. } => "ringing",
            SdkEvent::Answered { .. } => "answered",
            SdkEvent::Incoming { .. } => "incoming",
            SdkEvent::IncomingCancelled { .. } => "incoming_cancelled",
            SdkEvent::CallFailed { .. } => "call_failed",
            SdkEvent::Hangup { .. } => "hangup",
            SdkEvent::HoldChanged { .. } => "hold_changed",
            SdkEvent::Disconnected { .. } => "disconnected",
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            SdkEvent::Ringing { call_id }
            | SdkEvent::Answered { call_id }
            | SdkEvent::Incoming { call_id, .. }
            | SdkEvent::IncomingCancelled { call_id }
            | SdkEvent::CallFailed { call_id, .. }
            | SdkEvent::Hangup { call_id, .. }
            | SdkEvent::HoldChanged { call_id, .. } => Some(call_id),
            SdkEvent::Disconnected { .. } => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SdkError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Command failed: {0}")]
    Command(String),

    #[error("Timeout: no reply within {0}s")]
    Timeout(u64),
}

/// Operations of the vendor telephony client
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelephonySdk: Send + Sync {
    /// Connect and register; resolves once the SDK can place calls
    async fn connect(&self) -> Result<SdkEvents, SdkError>;

    async fn disconnect(&self) -> Result<(), SdkError>;

    /// Place an outbound call, returning the SDK call id
    async fn make_call(&self, number: &str) -> Result<String, SdkError>;

    async fn answer_call(&self, call_id: &str) -> Result<(), SdkError>;

    async fn reject_call(&self, call_id: &str) -> Result<(), SdkError>;

    async fn end_call(&self, call_id: &str) -> Result<(), SdkError>;

    async fn set_muted(&self, call_id: &str, muted: bool) -> Result<(), SdkError>;

    async fn set_on_hold(&self, call_id: &str, on_hold: bool) -> Result<(), SdkError>;

    async fn send_dtmf(&self, call_id: &str, digit: char) -> Result<(), SdkError>;
}
