//! Two-stage screening pipeline for one product.
//!
//! # Execution Flow
//! 1. Check the oracle is usable (fatal, before any dispatch)
//! 2. Initial pass over every review
//! 3. Keep the reviews judged non-compliant
//! 4. Re-verification pass over that subset only
//! 5. Keep the reviews confirmed non-compliant, in corpus order
//!
//! Each review ends in exactly one terminal state: dropped at a stage, final,
//! or unresolved at a stage. A cancelled run may leave reviews in `Pending`
//! or `Stage2Pending`.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use screener_core::{
    BatchSize, FinalEntry, Policy, PolicyError, ProductCorpus, ReviewId, ReviewState, StageKind,
};

use crate::cache::ResponseCache;
use crate::config::{ConfigError, ScreenerConfig};
use crate::oracle::OracleClient;
use crate::providers::{CompletionConfig, LlmProvider, OracleError, ProviderRegistry};
use crate::resilience::{LlmUsage, RetryPolicy, UsageTracker};
use crate::runner::{BatchRunner, RunControl, StageTelemetry};
use crate::stage::{Candidate, Flagged, InitialScreen, Reverification};

/// Conditions that stop a run before any batch is dispatched.
#[derive(Error, Debug)]
pub enum ScreeningError {
    #[error("Oracle not configured: {0}")]
    NotConfigured(String),

    #[error("Oracle provider '{0}' is not ready")]
    ProviderNotReady(String),

    #[error("Invalid pipeline settings: {0}")]
    Invalid(String),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] OracleError),
}

/// Outcome of screening one product.
#[derive(Debug, Clone, Serialize)]
pub struct ScreeningRun {
    pub asin: String,

    /// Confirmed non-compliant reviews, in corpus order
    pub final_results: Vec<FinalEntry>,

    /// Tokens across both stages, failed batches included
    pub total_tokens: u64,

    /// Oracle time across both stages, failed batches included
    #[serde(with = "crate::config::humantime_serde")]
    pub total_time: Duration,

    pub initial: StageTelemetry,
    pub reverify: StageTelemetry,

    /// Where every review ended up
    pub outcomes: BTreeMap<ReviewId, ReviewState>,

    pub usage: LlmUsage,
    pub cancelled: bool,
}

impl ScreeningRun {
    /// Reviews with no decodable record at some stage.
    pub fn unresolved(&self) -> Vec<ReviewId> {
        self.outcomes
            .iter()
            .filter(|(_, state)| matches!(state, ReviewState::Unresolved(_)))
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn state_of(&self, id: ReviewId) -> Option<ReviewState> {
        self.outcomes.get(&id).copied()
    }
}

pub struct ScreeningPipeline {
    oracle: OracleClient,
    policy: Policy,
    initial_batch_size: BatchSize,
    reverify_batch_size: BatchSize,
    max_concurrency: usize,
    retry: RetryPolicy,
    token_budget: Option<u64>,
    cache: Option<ResponseCache>,
}

impl ScreeningPipeline {
    pub fn builder() -> ScreeningPipelineBuilder {
        ScreeningPipelineBuilder::new()
    }

    /// Build from configuration, creating the provider through `registry`.
    pub fn from_config(
        config: &ScreenerConfig,
        registry: &ProviderRegistry,
    ) -> Result<Self, ScreeningError> {
        config.validate()?;
        let provider = registry.create(&config.provider.kind, &config.provider.settings_json())?;

        let batching = &config.batching;
        let mut builder = Self::builder()
            .provider(provider)
            .completion(config.completion.clone())
            .policy(config.load_policy()?)
            .initial_batch_size(batching.initial_batch_size)
            .reverify_batch_size(batching.reverify_batch_size)
            .max_concurrency(batching.max_concurrency)
            .retry(RetryPolicy::new(batching.max_retries, batching.retry_min_delay));

        if let Some(budget) = batching.token_budget {
            builder = builder.token_budget(budget);
        }
        if config.cache.enabled {
            builder = builder.cache(ResponseCache::new(config.cache.max_entries, config.cache.ttl));
        }

        builder.build()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn oracle(&self) -> &OracleClient {
        &self.oracle
    }

    pub async fn screen(&self, corpus: &ProductCorpus) -> Result<ScreeningRun, ScreeningError> {
        self.screen_with(corpus, &RunControl::new()).await
    }

    /// Screen one product, honouring cancellation through `control`.
    pub async fn screen_with(
        &self,
        corpus: &ProductCorpus,
        control: &RunControl,
    ) -> Result<ScreeningRun, ScreeningError> {
        if !self.oracle.is_ready().await {
            return Err(ScreeningError::ProviderNotReady(
                self.oracle.provider_name().to_string(),
            ));
        }

        let usage = UsageTracker::new(self.token_budget);
        let runner = BatchRunner::new(&self.oracle, &self.policy, &usage, control)
            .with_cache(self.cache.as_ref())
            .with_retry(self.retry)
            .with_concurrency(self.max_concurrency);

        let mut outcomes = BTreeMap::new();
        let candidates: Vec<Candidate> = corpus
            .identified()
            .into_iter()
            .map(|(id, review)| {
                outcomes.insert(id, ReviewState::Pending);
                Candidate { id, review }
            })
            .collect();

        tracing::info!(asin = %corpus.asin, reviews = candidates.len(), "Screening product");

        let initial = runner
            .run::<InitialScreen>(candidates, self.initial_batch_size)
            .await;

        for id in &initial.unresolved {
            outcomes.insert(*id, ReviewState::Unresolved(StageKind::Initial));
        }
        let mut flagged = Vec::new();
        for (candidate, verdict) in initial.resolved {
            if verdict.result.is_non_compliant() {
                outcomes.insert(candidate.id, ReviewState::Stage2Pending);
                flagged.push(Flagged {
                    id: candidate.id,
                    review: candidate.review,
                    initial: verdict,
                });
            } else {
                outcomes.insert(candidate.id, ReviewState::Dropped(StageKind::Initial));
            }
        }

        let flagged_count = flagged.len();
        let reverify = runner
            .run::<Reverification>(flagged, self.reverify_batch_size)
            .await;

        for id in &reverify.unresolved {
            outcomes.insert(*id, ReviewState::Unresolved(StageKind::Reverify));
        }
        let mut final_results = Vec::new();
        for (item, verdict) in reverify.resolved {
            if verdict.result.is_non_compliant() {
                outcomes.insert(item.id, ReviewState::Final);
                final_results.push(FinalEntry::new(&corpus.asin, &item.review, &verdict));
            } else {
                outcomes.insert(item.id, ReviewState::Dropped(StageKind::Reverify));
            }
        }

        let run = ScreeningRun {
            asin: corpus.asin.clone(),
            final_results,
            total_tokens: initial.telemetry.tokens + reverify.telemetry.tokens,
            total_time: initial.telemetry.elapsed + reverify.telemetry.elapsed,
            initial: initial.telemetry,
            reverify: reverify.telemetry,
            outcomes,
            usage: usage.snapshot(),
            cancelled: control.is_cancelled(),
        };

        tracing::info!(
            asin = %run.asin,
            flagged = flagged_count,
            final_results = run.final_results.len(),
            unresolved = run.initial.unresolved + run.reverify.unresolved,
            tokens = run.total_tokens,
            elapsed_ms = run.total_time.as_millis() as u64,
            cancelled = run.cancelled,
            "Screening finished"
        );

        Ok(run)
    }
}

impl std::fmt::Debug for ScreeningPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScreeningPipeline")
            .field("oracle", &self.oracle)
            .field("policy", &self.policy.name)
            .field("initial_batch_size", &self.initial_batch_size)
            .field("reverify_batch_size", &self.reverify_batch_size)
            .field("max_concurrency", &self.max_concurrency)
            .field("retry", &self.retry)
            .field("token_budget", &self.token_budget)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// Builder for ScreeningPipeline.
pub struct ScreeningPipelineBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    completion: CompletionConfig,
    policy: Option<Policy>,
    initial_batch_size: BatchSize,
    reverify_batch_size: BatchSize,
    max_concurrency: usize,
    retry: RetryPolicy,
    token_budget: Option<u64>,
    cache: Option<ResponseCache>,
}

impl ScreeningPipelineBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            completion: CompletionConfig::default(),
            policy: None,
            initial_batch_size: BatchSize::DEFAULT,
            reverify_batch_size: BatchSize::DEFAULT,
            max_concurrency: 1,
            retry: RetryPolicy::none(),
            token_budget: None,
            cache: None,
        }
    }

    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn completion(mut self, completion: CompletionConfig) -> Self {
        self.completion = completion;
        self
    }

    /// Defaults to the built-in marketplace policy.
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn initial_batch_size(mut self, size: BatchSize) -> Self {
        self.initial_batch_size = size;
        self
    }

    pub fn reverify_batch_size(mut self, size: BatchSize) -> Self {
        self.reverify_batch_size = size;
        self
    }

    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn token_budget(mut self, tokens: u64) -> Self {
        self.token_budget = Some(tokens);
        self
    }

    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn build(self) -> Result<ScreeningPipeline, ScreeningError> {
        let provider = self
            .provider
            .ok_or_else(|| ScreeningError::NotConfigured("No provider set".to_string()))?;

        let policy = self.policy.unwrap_or_else(Policy::marketplace_default);
        policy.validate()?;

        if self.max_concurrency == 0 {
            return Err(ScreeningError::Invalid(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.completion.timeout.is_zero() {
            return Err(ScreeningError::Invalid(
                "oracle timeout must be greater than zero".to_string(),
            ));
        }

        Ok(ScreeningPipeline {
            oracle: OracleClient::new(provider, self.completion),
            policy,
            initial_batch_size: self.initial_batch_size,
            reverify_batch_size: self.reverify_batch_size,
            max_concurrency: self.max_concurrency,
            retry: self.retry,
            token_budget: self.token_budget,
            cache: self.cache,
        })
    }
}

impl Default for ScreeningPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
