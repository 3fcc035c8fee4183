//! Voice settings, call history, queues and callbacks

use reqwest::Method;
use serde::de::IgnoredAny;
use tracing::{debug, instrument};

use super::client::BackendClient;
use super::types::paths;
use crate::error::ApiError;
use crate::models::{
    CallLogEntry, Callback, CreateCallbackRequest, Page, QueueAgent, QueueSummary, VoiceSettings,
};

impl BackendClient {
    /// Fetches the entity's voice settings (ACW timeout, caller id...)
    #[instrument(skip(self))]
    pub async fn fetch_voice_settings(&self) -> Result<VoiceSettings, ApiError> {
        let settings: VoiceSettings = self.get(paths::VOICE_SETTINGS).await?;
        debug!("Voice settings: acw={}s", settings.acw_timeout_seconds);
        Ok(settings)
    }

    /// One page of the agent's call history, newest first
    ///
    /// # Arguments
    ///
    /// * `page` - 1-based page number
    /// * `per_page` - Rows per page
    #[instrument(skip(self))]
    pub async fn fetch_call_history(
        &self,
        page: u32,
        per_page: u32,
    ) -> Result<Page<CallLogEntry>, ApiError> {
        let query = [("page", page), ("per_page", per_page)];
        let result: Page<CallLogEntry> = self.get_query(paths::CALL_HISTORY, &query).await?;
        debug!(
            "Call history page {}/{}: {} rows",
            result.page,
            result.total_pages(),
            result.data.len()
        );
        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn fetch_queues(&self) -> Result<Vec<QueueSummary>, ApiError> {
        self.get(paths::QUEUES).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_queue_agents(&self, queue_id: &str) -> Result<Vec<QueueAgent>, ApiError> {
        self.get(&paths::queue_agents(queue_id)).await
    }

    #[instrument(skip(self))]
    pub async fn fetch_callbacks(&self) -> Result<Vec<Callback>, ApiError> {
        self.get(paths::CALLBACKS).await
    }

    #[instrument(skip(self, request), fields(phone = %request.phone_number))]
    pub async fn post_callback(&self, request: &CreateCallbackRequest) -> Result<Callback, ApiError> {
        self.send_json(Method::POST, paths::CALLBACKS, request).await
    }

    /// Marks a scheduled callback as done. The response body is ignored.
    #[instrument(skip(self))]
    pub async fn post_callback_complete(&self, callback_id: &str) -> Result<(), ApiError> {
        let _: IgnoredAny = self.post_empty(&paths::complete_callback(callback_id)).await?;
        Ok(())
    }
}
