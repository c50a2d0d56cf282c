//! # screener-core
//!
//! Deterministic building blocks for two-stage review compliance screening.
//!
//! This crate never talks to the oracle. It owns:
//! - The data model (reviews, verdicts, per-review states, artifact entries)
//! - Policy documents, validated against an embedded JSON Schema
//! - Response decoding with per-index failure isolation
//! - Fixed-size batch windowing
//!
//! ## Example
//!
//! ```rust,ignore
//! use screener_core::{decode, InitialVerdict};
//!
//! let batch = decode::<InitialVerdict>(r#"{"1":{"result":"no","reason":"spam"}}"#, 1)?;
//! assert_eq!(batch.resolved_count(), 1);
//! ```

pub mod batch;
pub mod decode;
pub mod policy;
pub mod types;

pub use batch::{windows, BatchError, BatchSize, Window};
pub use decode::{decode, strip_fences, DecodeError, Decoded, DecodedBatch, ItemFault, WireRecord};
pub use policy::{Policy, PolicyError, PolicyRule};
pub use types::{
    ComplianceResult, FinalEntry, InitialVerdict, Percentage, ProductCorpus, RevalidatedVerdict,
    Review, ReviewId, ReviewState, StageKind,
};
