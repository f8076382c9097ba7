//! Dialog backend abstraction
//!
//! One text query in, one reply or failure out. No retry, no backoff.

mod error;
mod http;
mod types;

pub use error::{DialogError, DialogErrorKind};
pub use http::{HttpDialogClient, DEFAULT_ENDPOINT};
pub use types::*;

use async_trait::async_trait;
use std::sync::Arc;

/// Client for the remote dialog backend
#[async_trait]
pub trait DialogClient: Send + Sync {
    /// Make a single round trip
    async fn send_request(&self, request: &DialogRequest) -> Result<Reply, DialogError>;
}

#[async_trait]
impl<T: DialogClient + ?Sized> DialogClient for Arc<T> {
    async fn send_request(&self, request: &DialogRequest) -> Result<Reply, DialogError> {
        (**self).send_request(request).await
    }
}

/// Logging wrapper for dialog clients
pub struct LoggingDialogClient<C> {
    inner: C,
}

impl<C: DialogClient> LoggingDialogClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: DialogClient> DialogClient for LoggingDialogClient<C> {
    async fn send_request(&self, request: &DialogRequest) -> Result<Reply, DialogError> {
        let start = std::time::Instant::now();
        let result = self.inner.send_request(request).await;
        let duration = start.elapsed();

        match &result {
            Ok(reply) => {
                tracing::info!(
                    duration_ms = %duration.as_millis(),
                    text_len = request.text.chars().count(),
                    awaiting_clarification = reply.awaiting_clarification,
                    "Dialog request completed"
                );
            }
            Err(e) => {
                tracing::error!(
                    duration_ms = %duration.as_millis(),
                    error = %e.message,
                    status = ?e.status,
                    transient = e.kind.is_transient(),
                    "Dialog request failed"
                );
            }
        }

        result
    }
}
