//! Oracle client: one request in, raw text plus usage and latency out.
//!
//! The client enforces the per-call deadline and nothing else. It does not
//! retry and does not look at the response body.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::prompts::OracleRequest;
use crate::providers::{CompletionConfig, LlmProvider, OracleError, TokenUsage};

/// Raw oracle answer for one request.
#[derive(Debug, Clone)]
pub struct OracleReply {
    pub text: String,
    pub usage: TokenUsage,
    pub elapsed: Duration,

    /// Model reported by the provider
    pub model: String,
}

pub struct OracleClient {
    provider: Arc<dyn LlmProvider>,
    config: CompletionConfig,
}

impl OracleClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: CompletionConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Whether the provider reports itself usable (credentials present).
    pub async fn is_ready(&self) -> bool {
        self.provider.health_check().await
    }

    /// Send one request, bounded by `completion.timeout`.
    pub async fn complete(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        let started = Instant::now();
        let call = self.provider.complete(request.messages(), &self.config);

        let response = tokio::time::timeout(self.config.timeout, call)
            .await
            .map_err(|_| OracleError::Timeout(self.config.timeout))??;

        let elapsed = started.elapsed();
        tracing::debug!(
            stage = %request.stage,
            provider = self.provider.name(),
            tokens = response.usage.total(),
            elapsed_ms = elapsed.as_millis() as u64,
            response_len = response.content.len(),
            "Oracle call completed"
        );

        Ok(OracleReply {
            text: response.content,
            usage: response.usage,
            elapsed,
            model: response.model,
        })
    }
}

impl std::fmt::Debug for OracleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleClient")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}
