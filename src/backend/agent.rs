//! Agent presence endpoints

use reqwest::Method;
use tracing::{debug, info, instrument};

use super::client::BackendClient;
use super::types::paths;
use crate::error::ApiError;
use crate::models::{AgentPresence, AgentStatus, AgentStatusUpdate};

impl BackendClient {
    /// Fetches the agent's status as the backend sees it
    #[instrument(skip(self), fields(agent_id = %self.agent_id()))]
    pub async fn fetch_agent_status(&self) -> Result<AgentPresence, ApiError> {
        let presence: AgentPresence = self.get(&paths::agent_status(self.agent_id())).await?;
        debug!("Backend reports agent status: {}", presence.status);
        Ok(presence)
    }

    /// Persists a status change
    ///
    /// # Returns
    ///
    /// The status the backend settled on, which may differ from `status`
    /// when the server overrides it
    #[instrument(skip(self), fields(agent_id = %self.agent_id()))]
    pub async fn put_agent_status(&self, status: AgentStatus) -> Result<AgentPresence, ApiError> {
        let body = AgentStatusUpdate { status };
        let presence: AgentPresence = self
            .send_json(Method::PUT, &paths::agent_status(self.agent_id()), &body)
            .await?;

        if presence.status != status {
            info!(
                "Backend settled agent on '{}' instead of '{}'",
                presence.status, status
            );
        }
        Ok(presence)
    }
}
