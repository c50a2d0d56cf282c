//! Core data model for review screening.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A scraped product review.
///
/// Reviews are immutable once scraped. Within a batch the oracle addresses a
/// review by its 1-based position; everywhere else it is tracked by
/// [`ReviewId`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Review {
    /// Review headline
    #[serde(default)]
    pub title: String,

    /// Star rating as scraped (e.g., "1.0 out of 5 stars")
    #[serde(default)]
    pub rating: String,

    /// Review text
    pub body: String,
}

impl Review {
    /// Create a review.
    pub fn new(title: impl Into<String>, rating: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            rating: rating.into(),
            body: body.into(),
        }
    }
}

/// Stable identity of a review within one product corpus.
///
/// This is the review's zero-based position in the corpus as received, and
/// never changes across stages or batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub usize);

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "review#{}", self.0)
    }
}

/// Scraped review corpus for one product.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductCorpus {
    /// Marketplace product identifier
    pub asin: String,

    /// Product title, when the scraper captured it
    #[serde(default, alias = "product title", skip_serializing_if = "Option::is_none")]
    pub product_title: Option<String>,

    /// Every scraped review, in scrape order
    #[serde(default)]
    pub reviews: Vec<Review>,
}

impl ProductCorpus {
    /// Create a corpus from an ASIN and reviews.
    pub fn new(asin: impl Into<String>, reviews: Vec<Review>) -> Self {
        Self {
            asin: asin.into(),
            product_title: None,
            reviews,
        }
    }

    /// Pair each review with its stable identifier.
    pub fn identified(&self) -> Vec<(ReviewId, Review)> {
        self.reviews
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, r)| (ReviewId(i), r))
            .collect()
    }
}

/// Compliance judgement returned by the oracle.
///
/// The oracle answers in the marketplace convention: `yes` means the review
/// complies, `no` means it violates the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceResult {
    Compliant,
    NonCompliant,
}

impl ComplianceResult {
    /// Parse an oracle label, case-insensitively.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = label.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "yes" | "compliant" => Some(Self::Compliant),
            "no" | "non_compliant" | "not_compliant" | "noncompliant" => Some(Self::NonCompliant),
            _ => None,
        }
    }

    /// The label used on the oracle wire.
    pub fn wire_label(&self) -> &'static str {
        match self {
            Self::Compliant => "yes",
            Self::NonCompliant => "no",
        }
    }

    pub fn is_non_compliant(&self) -> bool {
        matches!(self, Self::NonCompliant)
    }
}

impl fmt::Display for ComplianceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compliant => write!(f, "compliant"),
            Self::NonCompliant => write!(f, "non_compliant"),
        }
    }
}

/// Stage 1 record for one review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialVerdict {
    pub result: ComplianceResult,
    pub reason: String,
}

/// Stage 2 record for one review that stage 1 flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevalidatedVerdict {
    pub result: ComplianceResult,
    pub reason: String,
    pub percentage_of_relevance: Percentage,
}

lazy_static! {
    static ref NUMBER: Regex = Regex::new(r"\d+(?:\.\d+)?").unwrap();
}

/// Share of a review's content that constitutes the violation, 0-100.
///
/// Serialized in the oracle's own notation, e.g. `"20%"`. Notations that are
/// not a single number (`"10-20%"`, `"about 30%"`) are kept verbatim, with the
/// largest number they mention as the value. Text with no usable number keeps
/// its notation and has no value.
#[derive(Debug, Clone, PartialEq)]
pub struct Percentage {
    value: Option<f64>,
    notation: Option<String>,
}

impl Percentage {
    pub const ZERO: Percentage = Percentage {
        value: Some(0.0),
        notation: None,
    };

    /// Create a percentage, rejecting values outside 0-100.
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && (0.0..=100.0).contains(&value)).then_some(Self {
            value: Some(value),
            notation: None,
        })
    }

    /// Parse `"20%"`, `"20"`, `" 12.5 % "`.
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
        number.parse::<f64>().ok().and_then(Self::new)
    }

    /// Read whatever the oracle wrote. `None` only for blank text.
    pub fn from_notation(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(exact) = Self::parse(trimmed) {
            return Some(exact);
        }

        let upper = NUMBER
            .find_iter(trimmed)
            .filter_map(|m| m.as_str().parse::<f64>().ok())
            .fold(None, |max: Option<f64>, n| Some(max.map_or(n, |m| m.max(n))));
        Some(Self {
            value: upper.filter(|v| (0.0..=100.0).contains(v)),
            notation: Some(trimmed.to_string()),
        })
    }

    /// Numeric share, when the notation carries one.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Whether the oracle's notation was kept instead of a plain number.
    pub fn is_verbatim(&self) -> bool {
        self.notation.is_some()
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.notation, self.value) {
            (Some(notation), _) => f.write_str(notation),
            (None, Some(v)) if v.fract() == 0.0 => write!(f, "{:.0}%", v),
            (None, Some(v)) => write!(f, "{}%", v),
            (None, None) => f.write_str("?"),
        }
    }
}

impl Serialize for Percentage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Percentage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let parsed = match &value {
            serde_json::Value::String(s) => Percentage::from_notation(s),
            serde_json::Value::Number(n) => n.as_f64().and_then(Percentage::new),
            _ => None,
        };
        parsed.ok_or_else(|| serde::de::Error::custom(format!("invalid percentage: {value}")))
    }
}

/// Which pass of the pipeline a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// First classification pass over every review
    Initial,
    /// Confirmation pass over reviews flagged by the initial pass
    Reverify,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Reverify => "reverify",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one review inside a screening run.
///
/// A stage's record is applied as soon as the stage returns, so a review goes
/// straight from `Pending` to `Dropped`, `Unresolved` or `Stage2Pending`, and
/// from `Stage2Pending` to `Dropped`, `Unresolved` or `Final`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    /// Not yet judged by the initial pass
    Pending,
    /// Flagged by the initial pass, awaiting re-verification
    Stage2Pending,
    /// Judged compliant at the given stage
    Dropped(StageKind),
    /// Confirmed non-compliant by re-verification
    Final,
    /// No decodable record at the given stage
    Unresolved(StageKind),
}

impl ReviewState {
    /// Whether the review has left the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Dropped(_) | Self::Final | Self::Unresolved(_))
    }
}

/// One entry of the per-product output artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalEntry {
    pub asin: String,
    pub title: String,
    pub rating: String,
    pub body: String,
    pub result: ComplianceResult,
    pub reason: String,
    pub percentage_of_relevance: Percentage,
}

impl FinalEntry {
    /// Build an artifact entry from a confirmed review.
    pub fn new(asin: &str, review: &Review, verdict: &RevalidatedVerdict) -> Self {
        Self {
            asin: asin.to_string(),
            title: review.title.clone(),
            rating: review.rating.clone(),
            body: review.body.clone(),
            result: verdict.result,
            reason: verdict.reason.clone(),
            percentage_of_relevance: verdict.percentage_of_relevance.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_labels() {
        assert_eq!(ComplianceResult::from_label("Yes"), Some(ComplianceResult::Compliant));
        assert_eq!(ComplianceResult::from_label(" NO "), Some(ComplianceResult::NonCompliant));
        assert_eq!(
            ComplianceResult::from_label("non-compliant"),
            Some(ComplianceResult::NonCompliant)
        );
        assert_eq!(ComplianceResult::from_label("maybe"), None);
        assert_eq!(ComplianceResult::NonCompliant.wire_label(), "no");
    }

    #[test]
    fn test_percentage_parsing() {
        assert_eq!(Percentage::parse("20%").unwrap().value(), Some(20.0));
        assert_eq!(Percentage::parse(" 12.5 % ").unwrap().value(), Some(12.5));
        assert_eq!(Percentage::parse("40").unwrap().value(), Some(40.0));
        assert!(Percentage::parse("140%").is_none());
        assert!(Percentage::parse("a lot").is_none());
    }

    #[test]
    fn test_percentage_notation_kept() {
        let range = Percentage::from_notation("10-20%").unwrap();
        assert_eq!(range.value(), Some(20.0));
        assert_eq!(range.to_string(), "10-20%");
        assert!(range.is_verbatim());

        let approx = Percentage::from_notation(" about 30% ").unwrap();
        assert_eq!(approx.value(), Some(30.0));
        assert_eq!(approx.to_string(), "about 30%");

        let vague = Percentage::from_notation("most of it").unwrap();
        assert_eq!(vague.value(), None);
        assert_eq!(vague.to_string(), "most of it");

        assert_eq!(Percentage::from_notation("20 %"), Percentage::parse("20%"));
        assert!(Percentage::from_notation("  ").is_none());
    }

    #[test]
    fn test_percentage_serde() {
        let p: Percentage = serde_json::from_str("\"20%\"").unwrap();
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"20%\"");

        let numeric: Percentage = serde_json::from_str("35").unwrap();
        assert_eq!(numeric.to_string(), "35%");

        let range: Percentage = serde_json::from_str("\"10-20%\"").unwrap();
        assert_eq!(serde_json::to_string(&range).unwrap(), "\"10-20%\"");
    }

    #[test]
    fn test_corpus_accepts_scraper_keys() {
        let json = r#"{
            "asin": "B0C88FHVFV",
            "product title": "Desk Lamp",
            "overall rating": "4.1 out of 5",
            "reviews": [{"title": "Bad", "rating": "1.0 out of 5 stars", "body": "Broke."}]
        }"#;
        let corpus: ProductCorpus = serde_json::from_str(json).unwrap();
        assert_eq!(corpus.product_title.as_deref(), Some("Desk Lamp"));
        assert_eq!(corpus.reviews.len(), 1);
        assert_eq!(corpus.identified()[0].0, ReviewId(0));
    }

    #[test]
    fn test_corpus_without_reviews() {
        let corpus: ProductCorpus = serde_json::from_str(r#"{"asin": "B01"}"#).unwrap();
        assert!(corpus.reviews.is_empty());
    }

    #[test]
    fn test_final_entry_serialization() {
        let review = Review::new("Meh", "2.0 out of 5 stars", "Call the seller at 555-0100");
        let verdict = RevalidatedVerdict {
            result: ComplianceResult::NonCompliant,
            reason: "Rule 5: private information".to_string(),
            percentage_of_relevance: Percentage::parse("20%").unwrap(),
        };
        let entry = FinalEntry::new("B01", &review, &verdict);
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["asin"], "B01");
        assert_eq!(value["result"], "non_compliant");
        assert_eq!(value["percentage_of_relevance"], "20%");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ReviewState::Stage2Pending.is_terminal());
        assert!(ReviewState::Dropped(StageKind::Initial).is_terminal());
        assert!(ReviewState::Unresolved(StageKind::Reverify).is_terminal());
        assert!(ReviewState::Final.is_terminal());
    }
}
