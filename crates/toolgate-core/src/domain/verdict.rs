//! Grading outcomes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Result of grading one rule against one thread.
///
/// `evidence` lists the specific facts that caused a failure (for example
/// the out-of-scope identifiers found); it is empty on pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
}

impl Verdict {
    pub fn pass(reason: impl Into<String>) -> Self {
        Self {
            passed: true,
            score: None,
            reason: reason.into(),
            evidence: Vec::new(),
        }
    }

    pub fn fail(reason: impl Into<String>, evidence: Vec<String>) -> Self {
        Self {
            passed: false,
            score: None,
            reason: reason.into(),
            evidence,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }
}

/// Per-item result record: rule name → verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub item_id: String,
    pub verdicts: BTreeMap<String, Verdict>,
}

impl ItemResult {
    /// Whether every rule passed for this item.
    pub fn all_passed(&self) -> bool {
        self.verdicts.values().all(|v| v.passed)
    }

    pub fn verdict(&self, rule: &str) -> Option<&Verdict> {
        self.verdicts.get(rule)
    }
}

/// An input item excluded from grading because its thread was malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantinedItem {
    pub item_id: String,
    pub defect: String,
}
