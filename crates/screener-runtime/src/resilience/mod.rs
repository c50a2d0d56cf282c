//! Resilience for oracle calls: retry with backoff and per-run token
//! accounting.

mod retry;
mod usage;

pub use retry::RetryPolicy;
pub use usage::{LlmUsage, TokenBudget, UsageTracker};
