//! The two screening passes, expressed as one trait so the batch runner can
//! drive either.

use screener_core::{
    InitialVerdict, Policy, RevalidatedVerdict, Review, ReviewId, StageKind, WireRecord,
};

use crate::prompts::{self, OracleRequest};

/// A pass over a list of items that yields one wire record per item.
pub trait Stage {
    type Item: Send + Sync;
    type Record: WireRecord + Send;

    const KIND: StageKind;

    /// Render the request for one window, numbering items `1..=items.len()`.
    fn render(policy: &Policy, items: &[Self::Item]) -> OracleRequest;

    fn review_id(item: &Self::Item) -> ReviewId;
}

/// A review entering the initial pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub id: ReviewId,
    pub review: Review,
}

/// A review the initial pass judged non-compliant.
#[derive(Debug, Clone, PartialEq)]
pub struct Flagged {
    pub id: ReviewId,
    pub review: Review,
    pub initial: InitialVerdict,
}

pub struct InitialScreen;

impl Stage for InitialScreen {
    type Item = Candidate;
    type Record = InitialVerdict;

    const KIND: StageKind = StageKind::Initial;

    fn render(policy: &Policy, items: &[Candidate]) -> OracleRequest {
        let reviews: Vec<&Review> = items.iter().map(|c| &c.review).collect();
        prompts::initial_request(policy, &reviews)
    }

    fn review_id(item: &Candidate) -> ReviewId {
        item.id
    }
}

pub struct Reverification;

impl Stage for Reverification {
    type Item = Flagged;
    type Record = RevalidatedVerdict;

    const KIND: StageKind = StageKind::Reverify;

    fn render(policy: &Policy, items: &[Flagged]) -> OracleRequest {
        let pairs: Vec<(&Review, &InitialVerdict)> =
            items.iter().map(|f| (&f.review, &f.initial)).collect();
        prompts::reverify_request(policy, &pairs)
    }

    fn review_id(item: &Flagged) -> ReviewId {
        item.id
    }
}
