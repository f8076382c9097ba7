//! HTTP implementation of the dialog client

use super::{DialogClient, DialogError, DialogRequest, DialogResponse, Reply};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

/// Relative path the widget posts to; a reverse proxy forwards it upstream
pub const DEFAULT_ENDPOINT: &str = "http://localhost:3000/api/process";

/// Dialog client that talks to `/api/process` over HTTP
pub struct HttpDialogClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpDialogClient {
    /// No request timeout is configured: a hung backend keeps the reply pending
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, DialogError> {
        let client = Client::builder()
            .build()
            .map_err(|e| DialogError::unknown(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::with_client(client, endpoint, api_key))
    }

    /// Use a preconfigured client (proxy, TLS roots)
    pub fn with_client(
        client: Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn classify_error(status: StatusCode, body: &str) -> DialogError {
        let message = format!("HTTP {}: {}", status.as_u16(), body.trim());
        let err = match status.as_u16() {
            401 | 403 => DialogError::auth(message),
            400 | 422 => DialogError::invalid_request(message),
            500..=599 => DialogError::server_error(message),
            _ => DialogError::unknown(message),
        };
        err.with_status(status.as_u16())
    }
}

#[async_trait]
impl DialogClient for HttpDialogClient {
    async fn send_request(&self, request: &DialogRequest) -> Result<Reply, DialogError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-Key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    DialogError::network(format!("Connection failed: {e}"))
                } else if e.is_timeout() {
                    DialogError::network(format!("Request timeout: {e}"))
                } else {
                    DialogError::network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DialogError::network(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::classify_error(status, &body));
        }

        let parsed: DialogResponse = serde_json::from_str(&body).map_err(|e| {
            DialogError::malformed(format!("Failed to parse response: {e} - body: {body}"))
                .with_status(status.as_u16())
        })?;

        parsed
            .into_reply()
            .map_err(|e| e.with_status(status.as_u16()))
    }
}
