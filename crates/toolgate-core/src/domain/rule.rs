//! Declarative rule configuration.
//!
//! Rules are data supplied by the caller. A [`Rule`] names a grader, binds
//! extractors to the grader's fact slots, and carries grader parameters.
//! Nothing here is validated until the rule set is compiled by
//! [`Evaluator::new`](crate::runner::Evaluator::new).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::canonical::compute_digest;
use crate::domain::error::{ConfigurationError, Result};

/// Sequence matching strictness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Same calls, same order, same length.
    ExactMatch,
    /// Expected calls appear as an ordered subsequence; extras tolerated.
    InOrderMatch,
    /// Same multiset of calls; order ignored.
    AnyOrderMatch,
}

impl Default for MatchMode {
    fn default() -> Self {
        Self::ExactMatch
    }
}

impl MatchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExactMatch => "exact_match",
            Self::InOrderMatch => "in_order_match",
            Self::AnyOrderMatch => "any_order_match",
        }
    }
}

/// Which way a pass-rate change counts as an improvement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredDirection {
    HigherIsBetter,
    LowerIsBetter,
    Neutral,
}

impl Default for DesiredDirection {
    fn default() -> Self {
        Self::HigherIsBetter
    }
}

impl DesiredDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HigherIsBetter => "higher_is_better",
            Self::LowerIsBetter => "lower_is_better",
            Self::Neutral => "neutral",
        }
    }
}

/// Reference to a registered extractor plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorSpec {
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

impl ExtractorSpec {
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// One declarative rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique name; keys the verdict in per-item results.
    pub name: String,
    /// Grader variant, e.g. `containment` or `sequence_conformance`.
    pub grader: String,
    /// Fact slot → extractor binding.
    #[serde(default)]
    pub extractors: BTreeMap<String, ExtractorSpec>,
    /// Grader-specific parameters.
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub direction: DesiredDirection,
}

impl Rule {
    pub fn new(name: impl Into<String>, grader: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            grader: grader.into(),
            extractors: BTreeMap::new(),
            params: Value::Null,
            direction: DesiredDirection::default(),
        }
    }

    /// Bind an extractor to a fact slot.
    pub fn with_extractor(mut self, slot: impl Into<String>, spec: ExtractorSpec) -> Self {
        self.extractors.insert(slot.into(), spec);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_direction(mut self, direction: DesiredDirection) -> Self {
        self.direction = direction;
        self
    }
}

/// Thresholds for baseline/candidate significance classification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Minimum items per side before a difference can be significant.
    pub min_samples: usize,
    /// p-value at or below which a difference is strong.
    pub strong_alpha: f64,
    /// p-value at or below which a difference is weak.
    pub weak_alpha: f64,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            min_samples: 10,
            strong_alpha: 0.001,
            weak_alpha: 0.05,
        }
    }
}

/// A named, versioned collection of rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub comparison: ComparisonConfig,
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            comparison: ComparisonConfig::default(),
            rules: Vec::new(),
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_comparison(mut self, comparison: ComparisonConfig) -> Self {
        self.comparison = comparison;
        self
    }

    /// Parse a rule-set document.
    pub fn from_value(value: Value) -> std::result::Result<Self, ConfigurationError> {
        serde_json::from_value(value).map_err(|e| ConfigurationError::InvalidDocument(e.to_string()))
    }

    /// SHA-256 hex digest of the canonical JSON form.
    pub fn digest(&self) -> Result<String> {
        compute_digest(&serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_set_document_roundtrip() {
        let doc = json!({
            "name": "db-assistant",
            "version": "1",
            "rules": [{
                "name": "tables_discovered",
                "grader": "containment",
                "extractors": {
                    "allow_list": {"name": "provenance", "params": {"tools": ["search_tables"], "path": "tables"}}
                },
                "params": {"target_tools": ["query_database"]},
                "direction": "higher_is_better"
            }]
        });
        let set = RuleSet::from_value(doc).expect("valid document");
        assert_eq!(set.rules.len(), 1);
        assert_eq!(set.rules[0].extractors["allow_list"].name, "provenance");
        assert_eq!(set.comparison, ComparisonConfig::default());
    }

    #[test]
    fn test_missing_rules_is_invalid_document() {
        assert!(matches!(
            RuleSet::from_value(json!({"name": "x"})),
            Err(ConfigurationError::InvalidDocument(_))
        ));
    }

    #[test]
    fn test_match_mode_wire_names() {
        let mode: MatchMode = serde_json::from_value(json!("in_order_match")).expect("mode");
        assert_eq!(mode, MatchMode::InOrderMatch);
        let dir: DesiredDirection = serde_json::from_value(json!("lower_is_better")).expect("dir");
        assert_eq!(dir, DesiredDirection::LowerIsBetter);
    }

    #[test]
    fn test_digest_changes_with_rules() {
        let base = RuleSet::new("s", "1").with_rule(Rule::new("a", "sequence_conformance"));
        let other = base.clone().with_rule(Rule::new("b", "containment"));
        let d1 = base.digest().expect("digest");
        assert_eq!(d1, base.digest().expect("digest again"));
        assert_ne!(d1, other.digest().expect("other digest"));
    }
}
