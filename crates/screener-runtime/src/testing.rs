//! In-process oracle for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, OracleError, TokenUsage,
};

/// What the scripted oracle does with one request.
pub(crate) enum Script {
    Reply(String),
    Delay(Duration, String),
    Fail(OracleError),
    /// Never answers within any sane deadline
    Hang,
}

type ScriptFn = Box<dyn Fn(&str) -> Script + Send + Sync>;

pub(crate) struct ScriptedOracle {
    script: ScriptFn,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedOracle {
    pub const TOKENS_PER_CALL: u32 = 150;

    pub fn new(script: impl Fn(&str) -> Script + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Oracle that judges reviews by keywords in their bodies.
    pub fn moderator() -> Self {
        Self::new(moderate)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedOracle {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, OracleError> {
        let prompt = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let text = match (self.script)(&prompt) {
            Script::Reply(text) => text,
            Script::Delay(delay, text) => {
                tokio::time::sleep(delay).await;
                text
            }
            Script::Fail(err) => return Err(err),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                "{}".to_string()
            }
        };

        Ok(CompletionResponse {
            content: text,
            usage: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: Self::TOKENS_PER_CALL - 100,
            },
            model: "scripted".to_string(),
            stop_reason: Some("stop".to_string()),
        })
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// One review as listed in a rendered request.
#[derive(Debug, Clone, Default)]
pub(crate) struct Listed {
    pub index: usize,
    pub body: String,
    pub result: Option<String>,
}

/// Parse the numbered review listing back out of a rendered prompt.
pub(crate) fn listing(prompt: &str) -> Vec<Listed> {
    let mut listed: Vec<Listed> = Vec::new();
    for line in prompt.lines() {
        if let Some(index) = line.strip_prefix("Review: ") {
            if let Ok(index) = index.trim().parse() {
                listed.push(Listed {
                    index,
                    ..Default::default()
                });
            }
        } else if let Some(body) = line.strip_prefix("Body: ") {
            if let Some(last) = listed.last_mut() {
                last.body = body.to_string();
            }
        } else if let Some(result) = line.strip_prefix("Result: ") {
            if let Some(last) = listed.last_mut() {
                last.result = Some(result.to_string());
            }
        }
    }
    listed
}

/// Keyword moderator.
///
/// Initial pass flags bodies mentioning "seller" or "shipping". Re-verification
/// confirms "seller" at 20% and overturns everything else. A body containing
/// "TIMEOUT" hangs the whole request during the initial pass; "GARBLED" makes
/// that one entry malformed.
pub(crate) fn moderate(prompt: &str) -> Script {
    let reverify = prompt.contains("percentage_of_relevance");
    let listed = listing(prompt);

    if !reverify && listed.iter().any(|l| l.body.contains("TIMEOUT")) {
        return Script::Hang;
    }

    let mut answer = Map::new();
    for item in listed {
        let entry = if item.body.contains("GARBLED") {
            Value::String("???".to_string())
        } else if reverify {
            if item.body.contains("seller") {
                json!({"result": "no", "reason": "seller feedback", "percentage_of_relevance": "20%"})
            } else {
                json!({"result": "yes", "reason": "product feedback"})
            }
        } else if item.body.contains("seller") {
            json!({"result": "no", "reason": "mentions seller"})
        } else if item.body.contains("shipping") {
            json!({"result": "no", "reason": "mentions shipping"})
        } else {
            json!({"result": "yes"})
        };
        answer.insert(item.index.to_string(), entry);
    }

    Script::Reply(Value::Object(answer).to_string())
}
