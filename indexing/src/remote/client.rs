use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::protocol::{self, JsonRpcRequest, ACCEPT_TYPES, SESSION_HEADER};
use super::{IndexSource, RemoteError};
use crate::metrics::Metrics;
use crate::period::Period;
use crate::types::IndexType;

const DEFAULT_URL: &str = "http://localhost:8000/mcp";
const DEFAULT_CLIENT_NAME: &str = "price-escalator";

#[derive(Debug, Clone)]
pub struct McpClientConfig {
    /// Endpoint receiving every JSON-RPC POST.
    pub url: String,
    pub client_name: String,
    pub client_version: String,
    pub connect_timeout: Duration,
}

impl Default for McpClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Session-aware client for the remote MCP index service.
///
/// The service requires a handshake before tool calls:
/// 1. `initialize` → session id in the `mcp-session-id` response header
/// 2. `notifications/initialized` carrying the session id (best effort)
/// 3. `tools/call` carrying the session id
///
/// The session id is cached and reused until a call fails, at which point it
/// is dropped and the next call handshakes again. The handshake runs while
/// holding the session lock, so concurrent first callers share one session.
pub struct McpIndexClient {
    http: reqwest::Client,
    config: McpClientConfig,
    session: Mutex<Option<String>>,
    next_request_id: AtomicU64,
    metrics: Arc<Metrics>,
}

impl McpIndexClient {
    pub fn new(config: McpClientConfig, metrics: Arc<Metrics>) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self::with_http_client(http, config, metrics))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        config: McpClientConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            http,
            config,
            session: Mutex::new(None),
            next_request_id: AtomicU64::new(0),
            metrics,
        }
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Forget the current session; the next call handshakes again.
    pub async fn reset_session(&self) {
        *self.session.lock().await = None;
    }

    /// Fetch the WPI all-commodities value for `period`.
    ///
    /// `Ok(None)` means the service answered without a value.
    pub async fn fetch_wpi(&self, period: Period) -> Result<Option<f64>, RemoteError> {
        let token = self.session_token().await?;
        match self.query(&token, period).await {
            Ok(value) => Ok(value),
            Err(e) => {
                self.discard_session(&token).await;
                Err(e)
            }
        }
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn session_token(&self) -> Result<String, RemoteError> {
        let mut session = self.session.lock().await;
        if let Some(token) = session.as_ref() {
            return Ok(token.clone());
        }
        let token = self.handshake().await?;
        *session = Some(token.clone());
        Ok(token)
    }

    /// Only clears the slot if it still holds `token`; a concurrent caller
    /// may already have established a fresh session.
    async fn discard_session(&self, token: &str) {
        let mut session = self.session.lock().await;
        if session.as_deref() == Some(token) {
            *session = None;
            debug!("Discarded MCP session after failure");
        }
    }

    async fn handshake(&self) -> Result<String, RemoteError> {
        let request = JsonRpcRequest::initialize(
            self.next_id(),
            &self.config.client_name,
            &self.config.client_version,
        );
        let resp = self.post(&request, None).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Session(format!(
                "initialize returned status {}",
                status.as_u16()
            )));
        }

        let token = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| RemoteError::Session("no session id in initialize response".into()))?;

        // Drain the (event-stream) body so the connection can be reused.
        let _ = resp.bytes().await?;

        self.metrics.record_handshake();
        self.notify_initialized(&token).await;
        info!(url = %self.config.url, "MCP session established");
        Ok(token)
    }

    /// Fire-and-forget: a failed notification is logged and otherwise
    /// invisible to the caller.
    async fn notify_initialized(&self, token: &str) {
        match self.post(&JsonRpcRequest::initialized(), Some(token)).await {
            Ok(resp) => {
                let _ = resp.bytes().await;
            }
            Err(e) => debug!("initialized notification failed: {e}"),
        }
    }

    async fn query(&self, token: &str, period: Period) -> Result<Option<f64>, RemoteError> {
        let request = JsonRpcRequest::wpi_query(self.next_id(), period.year, period.month);
        let resp = self.post(&request, Some(token)).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        let envelope = protocol::parse_envelope(&body)?;
        protocol::extract_index_value(&envelope)
    }

    async fn post(
        &self,
        request: &JsonRpcRequest,
        token: Option<&str>,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut builder = self
            .http
            .post(&self.config.url)
            .header(header::ACCEPT, ACCEPT_TYPES)
            .json(request);
        if let Some(token) = token {
            builder = builder.header(SESSION_HEADER, token);
        }
        builder.send().await
    }
}

#[async_trait]
impl IndexSource for McpIndexClient {
    fn supports(&self, index_type: IndexType) -> bool {
        index_type.supports_remote()
    }

    async fn fetch(&self, index_type: IndexType, period: Period) -> Option<f64> {
        if !self.supports(index_type) {
            return None;
        }
        match self.fetch_wpi(period).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                debug!(%period, "MCP returned no value");
                None
            }
            Err(e) => {
                warn!(%period, "MCP fetch failed: {e}");
                None
            }
        }
    }
}
