//! Batch runner: window a list, drive render → call → decode per window, and
//! merge decoded records back onto the original items.
//!
//! Failures never escape a window. A transport error, timeout or batch-level
//! decode error leaves every item of that window unresolved; an item-level
//! decode fault leaves only that item unresolved. Either way the runner moves
//! on to the next window.
//!
//! With `max_concurrency > 1` windows are dispatched through an ordered
//! buffer, so results are merged in window order and each decoded index is
//! resolved against the window it was rendered from.
//!
//! The token budget is checked when a window is dispatched, and usage is only
//! known once its reply arrives. Windows already in flight when the budget
//! runs out still complete, so a run can overshoot the budget by at most
//! `max_concurrency` windows.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use screener_core::{decode, windows, BatchSize, Decoded, DecodedBatch, Policy, ReviewId, Window};

use crate::cache::{CacheKey, ResponseCache};
use crate::oracle::OracleClient;
use crate::resilience::{RetryPolicy, UsageTracker};
use crate::stage::Stage;

/// Cooperative cancellation for a run.
///
/// Once cancelled no new window is dispatched. Windows already in flight
/// finish or time out normally.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    cancelled: Arc<AtomicBool>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Counters for one stage of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTelemetry {
    /// Windows sent to the oracle (or answered from cache)
    pub batches: usize,

    /// Dispatched windows that yielded nothing: transport, timeout or batch decode failure
    pub failed_batches: usize,

    /// Windows never dispatched because of cancellation or an exhausted token budget
    pub skipped_batches: usize,

    pub resolved: usize,
    pub unresolved: usize,
    pub tokens: u64,

    /// Oracle time summed over dispatched windows, failed ones included
    #[serde(with = "crate::config::humantime_serde")]
    pub elapsed: Duration,
}

/// Result of running one stage over a list of items.
pub struct StageOutput<S: Stage> {
    /// Items with a decoded record, in input order
    pub resolved: Vec<(S::Item, S::Record)>,

    /// Items whose window was dispatched but yielded no record for them
    pub unresolved: Vec<ReviewId>,

    /// Items whose window was never dispatched
    pub not_dispatched: Vec<ReviewId>,

    pub telemetry: StageTelemetry,
}

enum WindowOutcome<R> {
    Skipped,
    Failed {
        tokens: u64,
        elapsed: Duration,
    },
    Decoded {
        batch: DecodedBatch<R>,
        tokens: u64,
        elapsed: Duration,
    },
}

enum Slot<R> {
    NotDispatched,
    Unresolved,
    Resolved(R),
}

pub struct BatchRunner<'a> {
    oracle: &'a OracleClient,
    policy: &'a Policy,
    usage: &'a UsageTracker,
    control: &'a RunControl,
    cache: Option<&'a ResponseCache>,
    retry: RetryPolicy,
    max_concurrency: usize,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        oracle: &'a OracleClient,
        policy: &'a Policy,
        usage: &'a UsageTracker,
        control: &'a RunControl,
    ) -> Self {
        Self {
            oracle,
            policy,
            usage,
            control,
            cache: None,
            retry: RetryPolicy::none(),
            max_concurrency: 1,
        }
    }

    pub fn with_cache(mut self, cache: Option<&'a ResponseCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Values below 1 are treated as 1. Also bounds how many windows can be
    /// in flight past an exhausted token budget.
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Run stage `S` over `items` in windows of `size`.
    pub async fn run<S: Stage>(&self, items: Vec<S::Item>, size: BatchSize) -> StageOutput<S> {
        let planned = size.windows_for(items.len());
        tracing::info!(
            stage = %S::KIND,
            items = items.len(),
            batches = planned,
            batch_size = size.get(),
            "Stage started"
        );

        let outcomes: Vec<WindowOutcome<S::Record>> = stream::iter(windows(&items, size))
            .map(|window| self.run_window::<S>(window))
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut telemetry = StageTelemetry::default();
        let mut slots: Vec<Slot<S::Record>> = items.iter().map(|_| Slot::NotDispatched).collect();

        for (window, outcome) in windows(&items, size).zip(outcomes) {
            match outcome {
                WindowOutcome::Skipped => telemetry.skipped_batches += 1,
                WindowOutcome::Failed { tokens, elapsed } => {
                    telemetry.batches += 1;
                    telemetry.failed_batches += 1;
                    telemetry.tokens += tokens;
                    telemetry.elapsed += elapsed;
                    for slot in &mut slots[window.offset..window.offset + window.len()] {
                        *slot = Slot::Unresolved;
                    }
                }
                WindowOutcome::Decoded {
                    batch,
                    tokens,
                    elapsed,
                } => {
                    telemetry.batches += 1;
                    telemetry.tokens += tokens;
                    telemetry.elapsed += elapsed;
                    for (index, decoded) in batch.into_indexed() {
                        if let Some(slot) = slots.get_mut(window.offset + index - 1) {
                            *slot = match decoded {
                                Decoded::Resolved(record) => Slot::Resolved(record),
                                Decoded::Malformed(_) => Slot::Unresolved,
                            };
                        }
                    }
                }
            }
        }

        let mut output = StageOutput {
            resolved: Vec::new(),
            unresolved: Vec::new(),
            not_dispatched: Vec::new(),
            telemetry,
        };

        for (item, slot) in items.into_iter().zip(slots) {
            match slot {
                Slot::Resolved(record) => output.resolved.push((item, record)),
                Slot::Unresolved => output.unresolved.push(S::review_id(&item)),
                Slot::NotDispatched => output.not_dispatched.push(S::review_id(&item)),
            }
        }

        output.telemetry.resolved = output.resolved.len();
        output.telemetry.unresolved = output.unresolved.len();

        tracing::info!(
            stage = %S::KIND,
            batches = output.telemetry.batches,
            failed_batches = output.telemetry.failed_batches,
            skipped_batches = output.telemetry.skipped_batches,
            resolved = output.telemetry.resolved,
            unresolved = output.telemetry.unresolved,
            tokens = output.telemetry.tokens,
            elapsed_ms = output.telemetry.elapsed.as_millis() as u64,
            "Stage finished"
        );

        output
    }

    async fn run_window<S: Stage>(&self, window: Window<'_, S::Item>) -> WindowOutcome<S::Record> {
        if self.control.is_cancelled() {
            tracing::info!(stage = %S::KIND, batch = window.number, "Run cancelled, batch not dispatched");
            return WindowOutcome::Skipped;
        }
        if !self.usage.can_dispatch() {
            tracing::warn!(stage = %S::KIND, batch = window.number, "Token budget exhausted, batch not dispatched");
            return WindowOutcome::Skipped;
        }

        let request = S::render(self.policy, window.items);
        let started = Instant::now();

        let key = self
            .cache
            .map(|_| CacheKey::new(&request, &self.oracle.config().model));
        let cached = match (self.cache, &key) {
            (Some(cache), Some(key)) => cache.get(key).await,
            _ => None,
        };
        let from_cache = cached.is_some();

        let (text, tokens) = match cached {
            Some(text) => {
                self.usage.record_cache_hit();
                tracing::debug!(stage = %S::KIND, batch = window.number, "Response served from cache");
                (text, 0)
            }
            None => match self.retry.run(|| self.oracle.complete(&request)).await {
                Ok(reply) => {
                    self.usage.record(&reply.usage, &reply.model);
                    (reply.text, u64::from(reply.usage.total()))
                }
                Err(e) => {
                    tracing::warn!(
                        stage = %S::KIND,
                        batch = window.number,
                        items = window.len(),
                        error = %e,
                        "Oracle call failed, batch unresolved"
                    );
                    return WindowOutcome::Failed {
                        tokens: 0,
                        elapsed: started.elapsed(),
                    };
                }
            },
        };
        let elapsed = started.elapsed();

        match decode::<S::Record>(&text, window.len()) {
            Ok(batch) => {
                for index in 1..=batch.len() {
                    if let Some(Decoded::Malformed(fault)) = batch.get(index) {
                        tracing::warn!(
                            stage = %S::KIND,
                            batch = window.number,
                            index,
                            error = %fault,
                            "Review unresolved"
                        );
                    }
                }
                if let (Some(cache), Some(key), false) = (self.cache, key, from_cache) {
                    cache.insert(key, text).await;
                }
                WindowOutcome::Decoded {
                    batch,
                    tokens,
                    elapsed,
                }
            }
            Err(e) => {
                tracing::warn!(
                    stage = %S::KIND,
                    batch = window.number,
                    items = window.len(),
                    error = %e,
                    "Response rejected, batch unresolved"
                );
                WindowOutcome::Failed { tokens, elapsed }
            }
        }
    }
}
