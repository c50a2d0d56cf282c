//! Policy document parsing from YAML/JSON.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::schema::validate_policy_schema;

/// Errors that can occur when loading a policy document.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Failed to read policy file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Policy does not match schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Policy has no rules")]
    Empty,

    #[error("Rule numbering must run 1..{expected_len}: found {found} at position {position}")]
    Numbering {
        position: usize,
        found: u32,
        expected_len: usize,
    },

    #[error("Rule {0} has empty text")]
    EmptyRule(u32),
}

/// A single numbered policy rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyRule {
    /// 1-based rule number as shown to the oracle
    pub number: u32,

    /// Rule text, rendered verbatim
    pub text: String,
}

/// A versioned compliance policy.
///
/// Policies are immutable once loaded. Both screening stages render the same
/// policy value into every request of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    /// Version of the policy text (dotted numeric)
    pub policy_version: String,

    /// Human-readable name
    pub name: String,

    /// Date from which the policy applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<NaiveDate>,

    /// Rules in presentation order
    pub rules: Vec<PolicyRule>,

    /// Instruction appended after the rule list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closing_instruction: Option<String>,
}

const MARKETPLACE_RULES: [&str; 14] = [
    "Reviews must not mention sellers, customer service, ordering issues, returns, shipping, or damage during shipping.",
    "Acceptable if related to product value. No individual pricing experiences or specific store availability.",
    "**Supported languages only**: Reviews must be in the site's supported languages (English and Spanish on Amazon.com).",
    "**No spam or repetitive content**: Avoid repetitive text, excessive punctuation, symbols, or spam.",
    "**No private information**: Exclude personal information like phone numbers, emails, addresses, or order numbers.",
    "No profanity, harassment, threats, personal attacks, libel, or defamation.",
    "Excludes hate based on race, ethnicity, nationality, gender, sexual orientation, religion, age, or disability.",
    "**No explicit sexual content**: Avoid nudity, sexually explicit images, or descriptions.",
    "**No external links**: Only links to other Amazon products are allowed; no external sites or affiliate links.",
    "**No promotional content**: Reviews must not promote other companies, websites, or have conflicts of interest without clear disclosure.",
    "**No compensated reviews**: Reviews should not be in exchange for compensation, except through the Amazon Vine program.",
    "**Original content only**: No plagiarism, impersonation, or infringement of intellectual property.",
    "**No illegal activity promotion**: Avoid encouraging illegal activities, violence, drug use, underage drinking, fraud, or dangerous product misuse.",
    "**No medical claims**: Do not make claims about preventing or curing serious medical conditions.",
];

const MARKETPLACE_CLOSING: &str =
    "Evaluate and answer in detail why the review is not compliant.";

impl Policy {
    /// The built-in marketplace community guidelines.
    pub fn marketplace_default() -> Self {
        Self {
            policy_version: "1.0".to_string(),
            name: "Amazon community guidelines".to_string(),
            effective_date: None,
            rules: MARKETPLACE_RULES
                .iter()
                .enumerate()
                .map(|(i, text)| PolicyRule {
                    number: i as u32 + 1,
                    text: (*text).to_string(),
                })
                .collect(),
            closing_instruction: Some(MARKETPLACE_CLOSING.to_string()),
        }
    }

    /// Parse a policy from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, PolicyError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        Self::from_value(value)
    }

    /// Parse a policy from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Load a policy file; `.json` files are read as JSON, anything else as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "Loading policy");
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&contents),
            _ => Self::from_yaml(&contents),
        }
    }

    fn from_value(value: serde_json::Value) -> Result<Self, PolicyError> {
        validate_policy_schema(&value).map_err(PolicyError::SchemaViolation)?;
        let policy: Policy = serde_json::from_value(value)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Validate the policy structure.
    ///
    /// Rules must be numbered 1..N in order, since the number is what the
    /// oracle cites back in its reasons.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.rules.is_empty() {
            return Err(PolicyError::Empty);
        }

        for (position, rule) in self.rules.iter().enumerate() {
            if rule.number as usize != position + 1 {
                return Err(PolicyError::Numbering {
                    position,
                    found: rule.number,
                    expected_len: self.rules.len(),
                });
            }
            if rule.text.trim().is_empty() {
                return Err(PolicyError::EmptyRule(rule.number));
            }
        }

        Ok(())
    }

    /// Render the policy text embedded into every oracle request.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for rule in &self.rules {
            text.push_str(&format!("{}. {}\n", rule.number, rule.text));
        }
        if let Some(closing) = &self.closing_instruction {
            text.push('\n');
            text.push_str(closing);
            text.push('\n');
        }
        text
    }

    /// Find a rule by number.
    pub fn rule(&self, number: u32) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.number == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_POLICY: &str = r#"
policy_version: "2.1"
name: "Test Guidelines"
effective_date: "2024-06-01"
rules:
  - number: 1
    text: "No seller feedback."
  - number: 2
    text: "No external links."
closing_instruction: "Explain every violation."
"#;

    #[test]
    fn test_parse_valid_policy() {
        let policy = Policy::from_yaml(VALID_POLICY).unwrap();
        assert_eq!(policy.name, "Test Guidelines");
        assert_eq!(policy.rules.len(), 2);
        assert_eq!(
            policy.effective_date,
            NaiveDate::from_ymd_opt(2024, 6, 1)
        );
        assert_eq!(policy.rule(2).unwrap().text, "No external links.");
    }

    #[test]
    fn test_render_is_numbered_and_verbatim() {
        let policy = Policy::from_yaml(VALID_POLICY).unwrap();
        let text = policy.render();
        assert!(text.starts_with("1. No seller feedback.\n2. No external links.\n"));
        assert!(text.trim_end().ends_with("Explain every violation."));
    }

    #[test]
    fn test_empty_rules_rejected() {
        let yaml = r#"
policy_version: "1.0"
name: "Empty"
rules: []
"#;
        assert!(matches!(
            Policy::from_yaml(yaml),
            Err(PolicyError::SchemaViolation(_))
        ));

        let policy = Policy {
            rules: vec![],
            ..Policy::marketplace_default()
        };
        assert!(matches!(policy.validate(), Err(PolicyError::Empty)));
    }

    #[test]
    fn test_out_of_order_numbering_rejected() {
        let yaml = r#"
policy_version: "1.0"
name: "Gappy"
rules:
  - number: 1
    text: "First"
  - number: 3
    text: "Third"
"#;
        assert!(matches!(
            Policy::from_yaml(yaml),
            Err(PolicyError::Numbering { position: 1, found: 3, .. })
        ));
    }

    #[test]
    fn test_whitespace_rule_rejected() {
        let policy = Policy {
            rules: vec![PolicyRule {
                number: 1,
                text: "   ".to_string(),
            }],
            ..Policy::marketplace_default()
        };
        assert!(matches!(policy.validate(), Err(PolicyError::EmptyRule(1))));
    }

    #[test]
    fn test_marketplace_default_is_valid() {
        let policy = Policy::marketplace_default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.rules.len(), 14);
        assert!(policy.render().contains("14. **No medical claims**"));
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        let json = serde_json::to_string(&Policy::marketplace_default()).unwrap();
        fs::write(&path, json).unwrap();

        let policy = Policy::from_file(&path).unwrap();
        assert_eq!(policy, Policy::marketplace_default());
    }
}
