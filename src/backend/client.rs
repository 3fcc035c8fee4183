//! HTTP client for the CRM backend REST API
//!
//! Low-level request plumbing. Endpoint methods live in `agent.rs` and
//! `voice.rs`; every failure is classified into an `ApiError`.

use reqwest::{Client, ClientBuilder, Method, RequestBuilder};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::types::{Envelope, ErrorBody};
use crate::config::BackendConfig;
use crate::error::ApiError;

/// Client bound to one agent of the backend
pub struct BackendClient {
    http_client: Client,
    base_url: String,
    agent_id: String,
    api_token: Option<String>,
    timeout_ms: u64,
}

impl BackendClient {
    /// Creates a new backend client
    ///
    /// # Arguments
    ///
    /// * `base_url` - API root (e.g. "https://crm.example.com/api/v1")
    /// * `agent_id` - Agent this session belongs to
    /// * `api_token` - Bearer token, if the backend requires one
    /// * `timeout_ms` - Per-request timeout in milliseconds
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let client = BackendClient::new("http://127.0.0.1:8000/api/v1", "42", None, 10_000)?;
    /// ```
    pub fn new(
        base_url: &str,
        agent_id: &str,
        api_token: Option<String>,
        timeout_ms: u64,
    ) -> Result<Self, ApiError> {
        let http_client = ClientBuilder::new()
            .timeout(Duration::from_millis(timeout_ms))
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| ApiError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            agent_id: agent_id.to_string(),
            api_token: api_token.filter(|t| !t.is_empty()),
            timeout_ms,
        })
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, ApiError> {
        Self::new(
            &config.base_url,
            &config.agent_id,
            config.api_token.clone(),
            config.timeout_ms,
        )
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self
            .http_client
            .request(method, self.url(path))
            .header(reqwest::header::ACCEPT, "application/json");

        match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub(crate) async fn get<R>(&self, path: &str) -> Result<R, ApiError>
    where
        R: DeserializeOwned,
    {
        self.execute(Method::GET, path, self.request(Method::GET, path)).await
    }

    pub(crate) async fn get_query<Q, R>(&self, path: &str, query: &Q) -> Result<R, ApiError>
    where
        Q: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let builder = self.request(Method::GET, path).query(query);
        self.execute(Method::GET, path, builder).await
    }

    pub(crate) async fn send_json<B, R>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let builder = self.request(method.clone(), path).json(body);
        self.execute(method, path, builder).await
    }

    /// POST without a request body
    pub(crate) async fn post_empty<R>(&self, path: &str) -> Result<R, ApiError>
    where
        R: DeserializeOwned,
    {
        self.execute(Method::POST, path, self.request(Method::POST, path)).await
    }

    /// Sends the request and decodes a success body, accepting both bare
    /// and `{"data": ...}` payloads
    #[instrument(skip_all, fields(method = %method, path = %path))]
    async fn execute<R>(
        &self,
        method: Method,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<R, ApiError>
    where
        R: DeserializeOwned,
    {
        debug!("Backend request: {} {}", method, path);

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(self.timeout_ms)
            } else {
                ApiError::Connection(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ApiError::Parse(format!("Failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            let message = ErrorBody::message_from(&body);
            let err = ApiError::from_status(status.as_u16(), message);
            if status.is_server_error() {
                error!("Backend HTTP error: status={} {}", status, err);
            } else {
                warn!("Backend rejected request: status={} {}", status, err);
            }
            return Err(err);
        }

        debug!("Backend response: status={} bytes={}", status, body.len());

        // 204 and empty 200s decode as JSON null, which suits `()` and Option
        let body = if body.trim().is_empty() { "null" } else { body.as_str() };

        serde_json::from_str::<Envelope<R>>(body)
            .map(Envelope::into_inner)
            .map_err(|e| ApiError::Parse(format!("Failed to parse JSON: {} - Body: {}", e, body)))
    }
}
