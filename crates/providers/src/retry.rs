//! Transient-failure retry — a decorator over any `Provider`.
//!
//! Rate limits, 5xx responses, and network hiccups are retried with a short
//! fixed backoff; everything else surfaces immediately. After the schedule
//! is exhausted the last error is returned and the caller treats it as
//! permanent.

use async_trait::async_trait;
use fableloom_core::error::ProviderError;
use fableloom_core::provider::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Delay before each retry attempt. The first retry is immediate.
const BACKOFF: [Duration; 4] = [
    Duration::from_secs(0),
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// A provider that retries transient failures of an inner provider.
pub struct RetryingProvider {
    inner: Arc<dyn fableloom_core::Provider>,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn fableloom_core::Provider>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl fableloom_core::Provider for RetryingProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let mut last_error = None;
        for (attempt, delay) in std::iter::once(None)
            .chain(BACKOFF.iter().map(Some))
            .enumerate()
        {
            if let Some(delay) = delay {
                tokio::time::sleep(*delay).await;
            }
            match self.inner.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_transient() => {
                    warn!(
                        provider = %self.inner.name(),
                        attempt,
                        error = %e,
                        "Transient provider failure, will retry"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ProviderError::NotConfigured("empty retry loop".into())))
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ProviderError>>,
        ProviderError,
    > {
        // Retries cover establishing the stream; once chunks are flowing an
        // interruption surfaces to the consumer.
        let mut last_error = None;
        for (attempt, delay) in std::iter::once(None)
            .chain(BACKOFF.iter().map(Some))
            .enumerate()
        {
            if let Some(delay) = delay {
                tokio::time::sleep(*delay).await;
            }
            match self.inner.stream(request.clone()).await {
                Ok(rx) => return Ok(rx),
                Err(e) if e.is_transient() => {
                    warn!(
                        provider = %self.inner.name(),
                        attempt,
                        error = %e,
                        "Transient provider failure opening stream, will retry"
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_error.unwrap_or_else(|| ProviderError::NotConfigured("empty retry loop".into())))
    }
}
