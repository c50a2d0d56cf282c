//! Policy documents.
//!
//! A policy is structured data validated against an embedded JSON Schema and
//! rendered verbatim into every oracle request.

mod parser;
mod schema;

pub use parser::{Policy, PolicyError, PolicyRule};
pub use schema::validate_policy_schema;
