//! Token accounting for one screening run.
//!
//! Every oracle call is recorded, including calls whose response later fails
//! to decode. An optional token budget stops the runner from dispatching new
//! windows once spent; windows already in flight still complete.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::providers::TokenUsage;

/// Token ceiling for a run.
#[derive(Debug)]
pub struct TokenBudget {
    pub max_tokens: u64,
    used: AtomicU64,
}

impl TokenBudget {
    pub fn new(max_tokens: u64) -> Self {
        Self {
            max_tokens,
            used: AtomicU64::new(0),
        }
    }

    pub fn record(&self, tokens: u64) {
        self.used.fetch_add(tokens, Ordering::SeqCst);
    }

    pub fn remaining(&self) -> u64 {
        self.max_tokens.saturating_sub(self.used())
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Accumulated oracle usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,

    /// Oracle calls that returned a response
    pub llm_calls: u32,

    /// Requests answered from the response cache
    pub cache_hits: u32,

    /// Estimated cost in USD
    pub estimated_cost: f64,
}

impl LlmUsage {
    /// Add token usage from a provider response.
    pub fn add(&mut self, usage: &TokenUsage, model: &str) {
        self.prompt_tokens += u64::from(usage.prompt_tokens);
        self.completion_tokens += u64::from(usage.completion_tokens);
        self.total_tokens += u64::from(usage.total());
        self.llm_calls += 1;
        self.estimated_cost += Self::estimate_cost(usage, model);
    }

    /// Fold another run's usage into this one.
    pub fn merge(&mut self, other: &LlmUsage) {
        self.total_tokens += other.total_tokens;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.llm_calls += other.llm_calls;
        self.cache_hits += other.cache_hits;
        self.estimated_cost += other.estimated_cost;
    }

    fn estimate_cost(usage: &TokenUsage, model: &str) -> f64 {
        // USD per million tokens (input, output)
        let (input_rate, output_rate) = match model {
            m if m.contains("gpt-4o-mini") => (0.15, 0.6),
            m if m.contains("gpt-4o") => (2.5, 10.0),
            m if m.contains("gpt-4") => (30.0, 60.0),
            m if m.contains("haiku") => (1.0, 5.0),
            m if m.contains("opus") => (5.0, 25.0),
            m if m.contains("sonnet") => (3.0, 15.0),
            _ => (2.5, 10.0),
        };

        let input_cost = (usage.prompt_tokens as f64 / 1_000_000.0) * input_rate;
        let output_cost = (usage.completion_tokens as f64 / 1_000_000.0) * output_rate;
        input_cost + output_cost
    }
}

/// Per-run usage tracker, shared by concurrently running windows.
#[derive(Debug, Default)]
pub struct UsageTracker {
    budget: Option<TokenBudget>,
    usage: RwLock<LlmUsage>,
}

impl UsageTracker {
    pub fn new(token_budget: Option<u64>) -> Self {
        Self {
            budget: token_budget.map(TokenBudget::new),
            usage: RwLock::new(LlmUsage::default()),
        }
    }

    /// Whether a new window may be dispatched.
    pub fn can_dispatch(&self) -> bool {
        self.budget.as_ref().map_or(true, |b| !b.is_exhausted())
    }

    pub fn record(&self, usage: &TokenUsage, model: &str) {
        if let Some(budget) = &self.budget {
            budget.record(u64::from(usage.total()));
        }
        self.usage.write().add(usage, model);
    }

    pub fn record_cache_hit(&self) {
        self.usage.write().cache_hits += 1;
    }

    pub fn snapshot(&self) -> LlmUsage {
        self.usage.read().clone()
    }

    pub fn total_tokens(&self) -> u64 {
        self.usage.read().total_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(prompt: u32, completion: u32) -> TokenUsage {
        TokenUsage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    #[test]
    fn test_budget_enforcement() {
        let budget = TokenBudget::new(100);
        assert!(!budget.is_exhausted());

        budget.record(60);
        assert_eq!(budget.remaining(), 40);

        budget.record(60);
        assert_eq!(budget.remaining(), 0);
        assert!(budget.is_exhausted());
    }

    #[test]
    fn test_tracker_without_budget_never_blocks() {
        let tracker = UsageTracker::new(None);
        tracker.record(&usage(1_000_000, 1_000_000), "gpt-4o");
        assert!(tracker.can_dispatch());
        assert_eq!(tracker.total_tokens(), 2_000_000);
    }

    #[test]
    fn test_tracker_budget_stops_dispatch() {
        let tracker = UsageTracker::new(Some(200));
        tracker.record(&usage(100, 50), "gpt-4o");
        assert!(tracker.can_dispatch());
        tracker.record(&usage(100, 50), "gpt-4o");
        assert!(!tracker.can_dispatch());

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.llm_calls, 2);
        assert_eq!(snapshot.prompt_tokens, 200);
        assert_eq!(snapshot.completion_tokens, 100);
    }

    #[test]
    fn test_cost_estimation() {
        let mut llm = LlmUsage::default();
        llm.add(&usage(1000, 500), "gpt-4o");

        // 1000 * $2.5/MTok + 500 * $10/MTok = $0.0075
        assert!((llm.estimated_cost - 0.0075).abs() < 1e-9);
    }

    #[test]
    fn test_merge() {
        let mut a = LlmUsage::default();
        a.add(&usage(10, 5), "gpt-4o");
        let mut b = LlmUsage::default();
        b.add(&usage(20, 5), "gpt-4o");
        b.cache_hits = 1;

        a.merge(&b);
        assert_eq!(a.total_tokens, 40);
        assert_eq!(a.llm_calls, 2);
        assert_eq!(a.cache_hits, 1);
    }
}
