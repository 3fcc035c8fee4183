//! CRM backend integration
//!
//! REST client for the agent-facing endpoints:
//! - Agent presence (read / update status)
//! - Voice settings (ACW timeout)
//! - Call history, queues and scheduled callbacks
//!
//! # Usage
//!
//! ```rust,ignore
//! use crate::backend::{AgentBackend, BackendClient};
//!
//! let client = BackendClient::new("https://crm.example.com/api/v1", "42", Some(token), 10_000)?;
//! let presence = client.update_agent_status(AgentStatus::Available).await?;
//! ```

mod agent;
mod client;
mod types;
mod voice;

pub use client::BackendClient;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{
    AgentPresence, AgentStatus, CallLogEntry, Callback, CreateCallbackRequest, Page, QueueAgent,
    QueueSummary, VoiceSettings,
};

/// Backend operations the services depend on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn get_agent_status(&self) -> Result<AgentPresence, ApiError>;

    /// Returns the status the server actually settled on
    async fn update_agent_status(&self, status: AgentStatus) -> Result<AgentPresence, ApiError>;

    async fn get_voice_settings(&self) -> Result<VoiceSettings, ApiError>;

    async fn call_history(&self, page: u32, per_page: u32) -> Result<Page<CallLogEntry>, ApiError>;

    async fn list_queues(&self) -> Result<Vec<QueueSummary>, ApiError>;

    async fn queue_agents(&self, queue_id: &str) -> Result<Vec<QueueAgent>, ApiError>;

    async fn list_callbacks(&self) -> Result<Vec<Callback>, ApiError>;

    async fn create_callback(&self, request: &CreateCallbackRequest) -> Result<Callback, ApiError>;

    async fn complete_callback(&self, callback_id: &str) -> Result<(), ApiError>;
}

#[async_trait]
impl AgentBackend for BackendClient {
    async fn get_agent_status(&self) -> Result<AgentPresence, ApiError> {
        self.fetch_agent_status().await
    }

    async fn update_agent_status(&self, status: AgentStatus) -> Result<AgentPresence, ApiError> {
        self.put_agent_status(status).await
    }

    async fn get_voice_settings(&self) -> Result<VoiceSettings, ApiError> {
        self.fetch_voice_settings().await
    }

    async fn call_history(&self, page: u32, per_page: u32) -> Result<Page<CallLogEntry>, ApiError> {
        self.fetch_call_history(page, per_page).await
    }

    async fn list_queues(&self) -> Result<Vec<QueueSummary>, ApiError> {
        self.fetch_queues().await
    }

    async fn queue_agents(&self, queue_id: &str) -> Result<Vec<QueueAgent>, ApiError> {
        self.fetch_queue_agents(queue_id).await
    }

    async fn list_callbacks(&self) -> Result<Vec<Callback>, ApiError> {
        self.fetch_callbacks().await
    }

    async fn create_callback(&self, request: &CreateCallbackRequest) -> Result<Callback, ApiError> {
        self.post_callback(request).await
    }

    async fn complete_callback(&self, callback_id: &str) -> Result<(), ApiError> {
        self.post_callback_complete(callback_id).await
    }
}
