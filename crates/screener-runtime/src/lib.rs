//! # screener-runtime
//!
//! Oracle-backed two-stage screening of product reviews.
//!
//! The deterministic pieces (policy, decoding, windowing) live in
//! `screener-core`. This crate adds everything that talks to the oracle or
//! the filesystem:
//!
//! - Prompt rendering for the initial and re-verification passes
//! - Oracle providers (OpenAI, Anthropic) and the deadline-enforcing client
//! - The batch runner with per-window failure isolation, retry and caching
//! - The screening pipeline and its per-review outcome tracking
//! - Artifact sinks, the result publisher and the SKU front door
//!
//! ## Example
//!
//! ```rust,ignore
//! use screener_runtime::{ProviderRegistry, ScreenerConfig, ScreeningPipeline};
//!
//! let config = ScreenerConfig::from_file("screener.yaml")?;
//! let pipeline = ScreeningPipeline::from_config(&config, &ProviderRegistry::with_defaults())?;
//! let run = pipeline.screen(&corpus).await?;
//! println!("{} non-compliant reviews", run.final_results.len());
//! ```

pub mod cache;
pub mod config;
pub mod front_door;
pub mod oracle;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod resilience;
pub mod runner;
pub mod sink;
pub mod stage;

#[cfg(test)]
mod testing;

pub use cache::{CacheKey, ResponseCache};
pub use config::{
    BatchingConfig, CacheConfig, ConfigError, OutputConfig, ProviderSection, ScreenerConfig,
};
pub use front_door::{
    AsinResolver, CorpusSource, DirectoryCorpusSource, FrontDoor, FrontDoorError, SkuScreening,
    StaticAsinResolver,
};
pub use oracle::{OracleClient, OracleReply};
pub use pipeline::{ScreeningError, ScreeningPipeline, ScreeningPipelineBuilder, ScreeningRun};
pub use prompts::{initial_request, reverify_request, OracleRequest};
pub use providers::{
    ApiCredential, ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, OracleError,
    ProviderFactory, ProviderRegistry, TokenUsage,
};
pub use resilience::{LlmUsage, RetryPolicy, TokenBudget, UsageTracker};
pub use runner::{BatchRunner, RunControl, StageOutput, StageTelemetry};
pub use sink::{ArtifactSink, JsonFileSink, JsonLinesPublisher, ResultPublisher, SinkError};
pub use stage::{Candidate, Flagged, InitialScreen, Reverification, Stage};
