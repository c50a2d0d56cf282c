//! Oracle request templates.
//!
//! Every request is two messages:
//! 1. The moderator persona (identical across stages and batches)
//! 2. The stage template with the policy and a numbered review listing
//!
//! Rendering is a pure function of policy and items. Reviews are numbered
//! `1..=N` in window order and none is ever skipped, so the wire index of a
//! review is exactly its position in the window.

use screener_core::{InitialVerdict, Policy, Review, StageKind};
use std::collections::hash_map::DefaultHasher;
use std::fmt::Write as _;
use std::hash::{Hash, Hasher};

use crate::providers::ChatMessage;

/// System message sent with every request.
pub const MODERATOR_PERSONA: &str =
    "You are an expert moderator following the marketplace's community guidelines.";

/// Stage 1 template. `{{policy}}` and `{{reviews}}` are substituted.
pub const INITIAL_SCREEN_TEMPLATE: &str = r#"
You are tasked with rigorously evaluating product reviews against the community guidelines below. For each review, determine whether it complies with the guidelines and give a short explanation.

Community Guidelines:
{{policy}}

For every review listed, return an entry keyed by the review number. "result" is "yes" if the review complies and "no" if it does not. When the result is "no", "reason" explains which guideline is violated and why.

Return only JSON in exactly this format, with one entry per review and no others:
{
"1": {
    "result": "yes or no",
    "reason": "why the review is not compliant"
},
"2": {
    "result": "yes or no",
    "reason": "why the review is not compliant"
}
}

Reviews:
{{reviews}}
"#;

/// Stage 2 template. `{{policy}}` and `{{reviews}}` are substituted.
pub const REVERIFY_TEMPLATE: &str = r#"
You are tasked with rigorously evaluating product reviews against the community guidelines below. Each review has already been assessed once. Cross-verify the given result and reason and correct them if necessary. In the reason, name the guideline(s) being violated.

Community Guidelines:
{{policy}}

For every review listed, confirm or correct "result" ("yes" if the review complies, "no" if it does not) and "reason". When the result is "no", also give "percentage_of_relevance": the proportion of the review content that violates the guidelines. For example, if a review has 10 sentences and 1 of them violates a guideline, the percentage_of_relevance is "10%".

Return only JSON in exactly this format, with one entry per review and no others:
{
"1": {
    "result": "yes or no",
    "reason": "which guideline is violated and why",
    "percentage_of_relevance": "x%"
},
"2": {
    "result": "yes or no",
    "reason": "which guideline is violated and why",
    "percentage_of_relevance": "x%"
}
}

Reviews:
{{reviews}}
"#;

/// A fully rendered oracle request.
///
/// Retries must re-send this exact value; it is never re-rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    pub stage: StageKind,
    pub system: String,
    pub prompt: String,

    /// Number of reviews listed, i.e. the expected response index set `1..=item_count`
    pub item_count: usize,
}

impl OracleRequest {
    pub fn messages(&self) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(self.system.clone()),
            ChatMessage::user(self.prompt.clone()),
        ]
    }

    /// Stable hash of the request content, used as the cache key.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.stage.hash(&mut hasher);
        self.system.hash(&mut hasher);
        self.prompt.hash(&mut hasher);
        hasher.finish()
    }

    /// Rough size for logs.
    pub fn len(&self) -> usize {
        self.system.len() + self.prompt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }
}

fn render(template: &str, policy: &Policy, listing: &str) -> String {
    template
        .replace("{{policy}}", policy.render().trim_end())
        .replace("{{reviews}}", listing)
}

/// Render a stage 1 request for one window of reviews.
pub fn initial_request(policy: &Policy, reviews: &[&Review]) -> OracleRequest {
    let mut listing = String::new();
    for (i, review) in reviews.iter().enumerate() {
        let _ = write!(listing, "\nReview: {}\nBody: {}\n", i + 1, review.body);
    }

    OracleRequest {
        stage: StageKind::Initial,
        system: MODERATOR_PERSONA.to_string(),
        prompt: render(INITIAL_SCREEN_TEMPLATE, policy, &listing),
        item_count: reviews.len(),
    }
}

/// Render a stage 2 request for one window of flagged reviews.
pub fn reverify_request(policy: &Policy, items: &[(&Review, &InitialVerdict)]) -> OracleRequest {
    let mut listing = String::new();
    for (i, (review, verdict)) in items.iter().enumerate() {
        let _ = write!(
            listing,
            "\nReview: {}\nBody: {}\nResult: {}\nReason: {}\n",
            i + 1,
            review.body,
            verdict.result.wire_label(),
            verdict.reason
        );
    }

    OracleRequest {
        stage: StageKind::Reverify,
        system: MODERATOR_PERSONA.to_string(),
        prompt: render(REVERIFY_TEMPLATE, policy, &listing),
        item_count: items.len(),
    }
}
