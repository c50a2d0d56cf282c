//! Oracle response decoding.
//!
//! The oracle answers in free text that is *usually* a JSON object keyed by
//! the 1-based review index, sometimes wrapped in a fenced code block. Decoding
//! happens in two levels:
//!
//! 1. Batch level: strip fences, parse, check the index set against the
//!    request. Failure here makes every item of the batch unresolved.
//! 2. Item level: each index decodes independently into
//!    [`Decoded::Resolved`] or [`Decoded::Malformed`]. A malformed entry never
//!    affects its batch-mates.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::types::{ComplianceResult, InitialVerdict, Percentage, RevalidatedVerdict};

lazy_static! {
    /// Opening fence with optional language tag, e.g. "```json"
    static ref FENCE_OPEN: Regex = Regex::new(r"^\s*```[A-Za-z0-9_-]*[ \t]*\r?\n?").unwrap();

    /// Closing fence at the very end of the text
    static ref FENCE_CLOSE: Regex = Regex::new(r"\r?\n?[ \t]*```\s*$").unwrap();

    /// A complete fenced block anywhere in the text
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n(.*?)```").unwrap();
}

/// Batch-level decode failure. Every item of the batch is unresolved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Response is not valid JSON: {0}")]
    Unparsable(String),

    #[error("Response is JSON but not an object keyed by review index")]
    NotAnObject,

    #[error("Response index set does not match a request of {expected} items: unexpected keys {unexpected:?}")]
    IndexSetMismatch {
        expected: usize,
        unexpected: Vec<String>,
    },
}

/// Item-level decode failure. Only the affected index is unresolved.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ItemFault {
    #[error("No entry for this index")]
    Missing,

    #[error("Entry is not an object")]
    NotAnObject,

    #[error("Missing field '{0}'")]
    MissingField(&'static str),

    #[error("Invalid value for '{field}': {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Outcome of decoding one index.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<R> {
    Resolved(R),
    Malformed(ItemFault),
}

impl<R> Decoded<R> {
    pub fn resolved(&self) -> Option<&R> {
        match self {
            Decoded::Resolved(r) => Some(r),
            Decoded::Malformed(_) => None,
        }
    }
}

/// A record type the oracle returns per review index.
pub trait WireRecord: Sized {
    /// Decode one entry of the response object.
    fn from_wire(value: &Value) -> Result<Self, ItemFault>;
}

/// Per-index decode results for one batch, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBatch<R> {
    entries: Vec<Decoded<R>>,
}

impl<R> DecodedBatch<R> {
    /// Number of indices in the originating request.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a 1-based index.
    pub fn get(&self, index: usize) -> Option<&Decoded<R>> {
        index.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn resolved_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|d| matches!(d, Decoded::Resolved(_)))
            .count()
    }

    pub fn unresolved_count(&self) -> usize {
        self.len() - self.resolved_count()
    }

    /// Consume into `(1-based index, outcome)` pairs, in request order.
    pub fn into_indexed(self) -> impl Iterator<Item = (usize, Decoded<R>)> {
        self.entries
            .into_iter()
            .enumerate()
            .map(|(i, d)| (i + 1, d))
    }
}

/// Remove a surrounding fenced code block, if present.
pub fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let start = FENCE_OPEN.find(trimmed).map(|m| m.end()).unwrap_or(0);
    let body = &trimmed[start..];
    let end = FENCE_CLOSE
        .find(body)
        .map(|m| m.start())
        .unwrap_or(body.len());
    body[..end].trim()
}

/// Body of the first fenced block when prose sits outside the fences.
fn extract_fenced_block(raw: &str) -> Option<&str> {
    FENCED_BLOCK
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Slice from the first `{` to the last `}` when prose surrounds the payload.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then_some(&raw[start..=end])
}

fn parse_payload(text: &str) -> Result<Value, DecodeError> {
    let stripped = strip_fences(text);
    match serde_json::from_str::<Value>(stripped) {
        Ok(value) => Ok(value),
        Err(first) => {
            tracing::debug!(error = %first, "Response is not bare JSON, extracting object");
            extract_fenced_block(text)
                .and_then(|block| serde_json::from_str::<Value>(block).ok())
                .or_else(|| {
                    extract_json_object(stripped)
                        .and_then(|candidate| serde_json::from_str::<Value>(candidate).ok())
                })
                .ok_or_else(|| DecodeError::Unparsable(first.to_string()))
        }
    }
}

/// Decode an oracle response for a request of `expected_count` items.
///
/// Keys must be string-encoded indices within `1..=expected_count`. Any other
/// key means the oracle renumbered or shifted the batch, and the whole
/// mapping is rejected rather than risk attaching a record to the wrong
/// review. Indices that are absent are reported as [`ItemFault::Missing`].
pub fn decode<R: WireRecord>(
    response_text: &str,
    expected_count: usize,
) -> Result<DecodedBatch<R>, DecodeError> {
    let value = parse_payload(response_text)?;
    let object = value.as_object().ok_or(DecodeError::NotAnObject)?;
    let by_index = index_entries(object, expected_count)?;

    let entries = (1..=expected_count)
        .map(|index| match by_index.get(&index) {
            Some(entry) => match R::from_wire(entry) {
                Ok(record) => Decoded::Resolved(record),
                Err(fault) => Decoded::Malformed(fault),
            },
            None => Decoded::Malformed(ItemFault::Missing),
        })
        .collect();

    Ok(DecodedBatch { entries })
}

fn index_entries(
    object: &Map<String, Value>,
    expected_count: usize,
) -> Result<BTreeMap<usize, &Value>, DecodeError> {
    let mut by_index = BTreeMap::new();
    let mut unexpected = Vec::new();

    for (key, entry) in object {
        match key.trim().parse::<usize>() {
            Ok(index) if (1..=expected_count).contains(&index) => {
                if by_index.insert(index, entry).is_some() {
                    unexpected.push(key.clone());
                }
            }
            _ => unexpected.push(key.clone()),
        }
    }

    if unexpected.is_empty() {
        Ok(by_index)
    } else {
        Err(DecodeError::IndexSetMismatch {
            expected: expected_count,
            unexpected,
        })
    }
}

fn entry_object(value: &Value) -> Result<&Map<String, Value>, ItemFault> {
    value.as_object().ok_or(ItemFault::NotAnObject)
}

fn result_field(entry: &Map<String, Value>) -> Result<ComplianceResult, ItemFault> {
    let raw = entry.get("result").ok_or(ItemFault::MissingField("result"))?;
    raw.as_str()
        .and_then(ComplianceResult::from_label)
        .ok_or_else(|| ItemFault::InvalidField {
            field: "result",
            value: raw.to_string(),
        })
}

/// The reason is free text; an absent or null reason decodes as empty.
fn reason_field(entry: &Map<String, Value>) -> Result<String, ItemFault> {
    match entry.get("reason") {
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(Value::Null) | None => Ok(String::new()),
        Some(other) => Err(ItemFault::InvalidField {
            field: "reason",
            value: other.to_string(),
        }),
    }
}

/// A confirmed violation keeps whatever share the oracle wrote; only an
/// absent, blank or non-scalar value is a fault. Compliant entries default to
/// zero.
fn percentage_field(
    entry: &Map<String, Value>,
    result: ComplianceResult,
) -> Result<Percentage, ItemFault> {
    let parsed = match entry.get("percentage_of_relevance") {
        Some(Value::String(s)) => Percentage::from_notation(s),
        Some(Value::Number(n)) => Percentage::from_notation(&n.to_string()),
        Some(Value::Null) | None => None,
        Some(other) => {
            return Err(ItemFault::InvalidField {
                field: "percentage_of_relevance",
                value: other.to_string(),
            })
        }
    };

    match parsed {
        Some(p) if result.is_non_compliant() => Ok(p),
        Some(p) if p.value().is_some() => Ok(p),
        Some(_) => Ok(Percentage::ZERO),
        None if result.is_non_compliant() => {
            Err(ItemFault::MissingField("percentage_of_relevance"))
        }
        None => Ok(Percentage::ZERO),
    }
}

impl WireRecord for InitialVerdict {
    fn from_wire(value: &Value) -> Result<Self, ItemFault> {
        let entry = entry_object(value)?;
        let result = result_field(entry)?;
        let reason = reason_field(entry)?;
        Ok(Self { result, reason })
    }
}

impl WireRecord for RevalidatedVerdict {
    fn from_wire(value: &Value) -> Result<Self, ItemFault> {
        let entry = entry_object(value)?;
        let result = result_field(entry)?;
        let reason = reason_field(entry)?;
        let percentage_of_relevance = percentage_field(entry, result)?;
        Ok(Self {
            result,
            reason,
            percentage_of_relevance,
        })
    }
}
