//! Sequence matching of actual tool calls against an expected sequence.
//!
//! Calls are paired by tool name first. With duplicate names the pairing is
//! greedy in encounter order: the first unpaired actual occurrence of a name
//! is paired with the first unpaired expected occurrence. Arguments are
//! compared on the resulting pairs only, so a name match with different
//! arguments is a mismatch, never a fallback to a later occurrence.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::canonical::canonical_eq;
use crate::domain::rule::MatchMode;
use crate::extract::CallRecord;

/// One entry of an expected ("ground truth") sequence.
///
/// Deserializes from a bare tool name or from `{name, arguments}`.
/// `arguments: None` skips the argument sub-check for that entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ExpectedCallRepr")]
pub struct ExpectedCall {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExpectedCallRepr {
    Name(String),
    Full {
        name: String,
        #[serde(default)]
        arguments: Option<Map<String, Value>>,
    },
}

impl From<ExpectedCallRepr> for ExpectedCall {
    fn from(repr: ExpectedCallRepr) -> Self {
        match repr {
            ExpectedCallRepr::Name(name) => Self {
                name,
                arguments: None,
            },
            ExpectedCallRepr::Full { name, arguments } => Self { name, arguments },
        }
    }
}

impl ExpectedCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Value) -> Self {
        self.arguments = match arguments {
            Value::Object(map) => Some(map),
            _ => Some(Map::new()),
        };
        self
    }
}

/// A single argument-level delta between an expected and an actual call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentDelta {
    pub key: String,
    pub expected: Value,
    pub actual: Value,
}

/// A name-matched pair whose arguments differ.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArgumentMismatch {
    pub name: String,
    pub expected_index: usize,
    pub actual_index: usize,
    pub deltas: Vec<ArgumentDelta>,
}

/// Outcome of matching one actual sequence against one expected sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub mode: MatchMode,
    pub passed: bool,
    /// `(expected_index, actual_index)` pairs, in expected order.
    pub pairs: Vec<(usize, usize)>,
    /// Expected indices left unpaired.
    pub missing: Vec<usize>,
    /// Actual indices left unpaired. Tolerated under `in_order_match`.
    pub unexpected: Vec<usize>,
    pub argument_mismatches: Vec<ArgumentMismatch>,
}

impl MatchOutcome {
    /// Number of expected calls paired without an argument mismatch.
    pub fn matched(&self) -> usize {
        self.pairs.len() - self.argument_mismatches.len()
    }

    /// Fraction of expected calls matched; `1.0` for an empty expectation.
    pub fn score(&self, expected_len: usize) -> f64 {
        if expected_len == 0 {
            1.0
        } else {
            self.matched() as f64 / expected_len as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Argument diffing
// ---------------------------------------------------------------------------

/// Key-level deltas between two argument mappings under canonical equality.
pub fn argument_delta(expected: &Map<String, Value>, actual: &Map<String, Value>) -> Vec<ArgumentDelta> {
    let mut deltas = Vec::new();

    for (key, want) in expected {
        match actual.get(key) {
            Some(got) if !canonical_eq(want, got) => deltas.push(ArgumentDelta {
                key: key.clone(),
                expected: want.clone(),
                actual: got.clone(),
            }),
            None => deltas.push(ArgumentDelta {
                key: key.clone(),
                expected: want.clone(),
                actual: Value::Null,
            }),
            _ => {}
        }
    }
    for (key, got) in actual {
        if !expected.contains_key(key) {
            deltas.push(ArgumentDelta {
                key: key.clone(),
                expected: Value::Null,
                actual: got.clone(),
            });
        }
    }

    deltas.sort_by(|a, b| a.key.cmp(&b.key));
    deltas
}

// ---------------------------------------------------------------------------
// Pairing strategies
// ---------------------------------------------------------------------------

fn pair_exact(expected: &[ExpectedCall], actual: &[CallRecord]) -> Vec<(usize, usize)> {
    expected
        .iter()
        .zip(actual)
        .enumerate()
        .filter(|(_, (e, a))| e.name == a.name)
        .map(|(i, _)| (i, i))
        .collect()
}

fn pair_in_order(expected: &[ExpectedCall], actual: &[CallRecord]) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    let mut next = 0;
    for (ai, call) in actual.iter().enumerate() {
        match expected.get(next) {
            Some(want) if want.name == call.name => {
                pairs.push((next, ai));
                next += 1;
            }
            Some(_) => {}
            None => break,
        }
    }
    pairs
}

fn pair_any_order(expected: &[ExpectedCall], actual: &[CallRecord]) -> Vec<(usize, usize)> {
    let mut used = vec![false; actual.len()];
    let mut pairs = Vec::new();
    for (ei, want) in expected.iter().enumerate() {
        let found = actual
            .iter()
            .enumerate()
            .find(|(ai, call)| !used[*ai] && call.name == want.name)
            .map(|(ai, _)| ai);
        if let Some(ai) = found {
            used[ai] = true;
            pairs.push((ei, ai));
        }
    }
    pairs
}

/// Match `actual` against `expected` under `mode`.
///
/// With `check_arguments`, every pair whose expected entry carries
/// arguments must have canonically equal arguments.
pub fn match_sequence(
    mode: MatchMode,
    expected: &[ExpectedCall],
    actual: &[CallRecord],
    check_arguments: bool,
) -> MatchOutcome {
    let pairs = match mode {
        MatchMode::ExactMatch => pair_exact(expected, actual),
        MatchMode::InOrderMatch => pair_in_order(expected, actual),
        MatchMode::AnyOrderMatch => pair_any_order(expected, actual),
    };

    let mut expected_paired = vec![false; expected.len()];
    let mut actual_paired = vec![false; actual.len()];
    let mut argument_mismatches = Vec::new();

    for &(ei, ai) in &pairs {
        expected_paired[ei] = true;
        actual_paired[ai] = true;

        if !check_arguments {
            continue;
        }
        if let Some(want) = &expected[ei].arguments {
            let got = &actual[ai].arguments;
            let deltas = argument_delta(want, got);
            if !deltas.is_empty() {
                argument_mismatches.push(ArgumentMismatch {
                    name: expected[ei].name.clone(),
                    expected_index: ei,
                    actual_index: ai,
                    deltas,
                });
            }
        }
    }

    let missing: Vec<usize> = (0..expected.len()).filter(|&i| !expected_paired[i]).collect();
    let unexpected: Vec<usize> = (0..actual.len()).filter(|&i| !actual_paired[i]).collect();

    let extras_fail = mode != MatchMode::InOrderMatch;
    let passed = missing.is_empty()
        && argument_mismatches.is_empty()
        && (!extras_fail || unexpected.is_empty());

    MatchOutcome {
        mode,
        passed,
        pairs,
        missing,
        unexpected,
        argument_mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expected(names: &[&str]) -> Vec<ExpectedCall> {
        names.iter().map(|n| ExpectedCall::new(*n)).collect()
    }

    fn actual(names: &[&str]) -> Vec<CallRecord> {
        names.iter().map(|n| CallRecord::new(*n)).collect()
    }

    fn call(name: &str, args: Value) -> CallRecord {
        let map = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        CallRecord::new(name).with_arguments(map)
    }

    #[test]
    fn test_exact_match_identical() {
        let out = match_sequence(
            MatchMode::ExactMatch,
            &expected(&["a", "b", "c"]),
            &actual(&["a", "b", "c"]),
            false,
        );
        assert!(out.passed);
        assert_eq!(out.matched(), 3);
    }

    #[test]
    fn test_exact_match_adjacent_swap_fails() {
        let out = match_sequence(
            MatchMode::ExactMatch,
            &expected(&["a", "b", "c"]),
            &actual(&["a", "c", "b"]),
            false,
        );
        assert!(!out.passed);
        assert_eq!(out.missing, vec![1, 2]);
        assert_eq!(out.unexpected, vec![1, 2]);
    }

    #[test]
    fn test_exact_match_length_differs() {
        let out = match_sequence(
            MatchMode::ExactMatch,
            &expected(&["a", "b"]),
            &actual(&["a", "b", "c"]),
            false,
        );
        assert!(!out.passed);
        assert!(out.missing.is_empty());
        assert_eq!(out.unexpected, vec![2]);
    }

    #[test]
    fn test_in_order_tolerates_interleaved_extras() {
        let out = match_sequence(
            MatchMode::InOrderMatch,
            &expected(&["search_tables", "query_database"]),
            &actual(&["list_tables", "search_tables", "describe", "query_database"]),
            false,
        );
        assert!(out.passed);
        assert_eq!(out.pairs, vec![(0, 1), (1, 3)]);
        assert_eq!(out.unexpected, vec![0, 2]);
    }

    #[test]
    fn test_in_order_reversed_fails() {
        let out = match_sequence(
            MatchMode::InOrderMatch,
            &expected(&["a", "b"]),
            &actual(&["b", "a"]),
            false,
        );
        assert!(!out.passed);
        assert_eq!(out.missing, vec![1]);
    }

    #[test]
    fn test_any_order_ignores_order() {
        let out = match_sequence(
            MatchMode::AnyOrderMatch,
            &expected(&["a", "b", "c"]),
            &actual(&["c", "a", "b"]),
            false,
        );
        assert!(out.passed);
    }

    #[test]
    fn test_any_order_multiset_differences_fail() {
        let missing = match_sequence(
            MatchMode::AnyOrderMatch,
            &expected(&["a", "b"]),
            &actual(&["a", "c"]),
            false,
        );
        assert!(!missing.passed);
        assert_eq!(missing.missing, vec![1]);

        let extra = match_sequence(
            MatchMode::AnyOrderMatch,
            &expected(&["a", "b"]),
            &actual(&["a", "b", "a"]),
            false,
        );
        assert!(!extra.passed);
        assert_eq!(extra.unexpected, vec![2]);
    }

    #[test]
    fn test_argument_mismatch_is_failure() {
        let want = vec![ExpectedCall::new("query_database").with_arguments(json!({"limit": 10}))];
        let got = vec![call("query_database", json!({"limit": 20}))];
        let out = match_sequence(MatchMode::ExactMatch, &want, &got, true);
        assert!(!out.passed);
        assert_eq!(out.matched(), 0);
        assert_eq!(out.argument_mismatches[0].deltas[0].key, "limit");

        let unchecked = match_sequence(MatchMode::ExactMatch, &want, &got, false);
        assert!(unchecked.passed);
    }

    #[test]
    fn test_argument_equality_is_canonical() {
        let want = vec![ExpectedCall::new("q").with_arguments(json!({"a": 1, "b": {"x": 1.0}}))];
        let got = vec![call("q", json!({"b": {"x": 1}, "a": 1.0}))];
        assert!(match_sequence(MatchMode::ExactMatch, &want, &got, true).passed);
    }

    #[test]
    fn test_duplicates_pair_greedily_in_encounter_order() {
        let want = vec![
            ExpectedCall::new("q").with_arguments(json!({"n": 1})),
            ExpectedCall::new("q").with_arguments(json!({"n": 2})),
        ];
        let got = vec![call("q", json!({"n": 2})), call("q", json!({"n": 1}))];
        let out = match_sequence(MatchMode::AnyOrderMatch, &want, &got, true);
        assert_eq!(out.pairs, vec![(0, 0), (1, 1)]);
        assert!(!out.passed);
        assert_eq!(out.argument_mismatches.len(), 2);
    }

    #[test]
    fn test_argument_delta_reports_missing_and_extra_keys() {
        let want = json!({"sql": "SELECT 1", "limit": 5});
        let got = json!({"sql": "SELECT 1", "timeout": 30});
        let deltas = argument_delta(
            want.as_object().expect("object"),
            got.as_object().expect("object"),
        );
        let keys: Vec<_> = deltas.iter().map(|d| d.key.as_str()).collect();
        assert_eq!(keys, vec!["limit", "timeout"]);
        assert_eq!(deltas[0].actual, Value::Null);
    }

    #[test]
    fn test_expected_call_accepts_bare_names() {
        let parsed: Vec<ExpectedCall> =
            serde_json::from_value(json!(["a", {"name": "b", "arguments": {"x": 1}}])).expect("parse");
        assert_eq!(parsed[0], ExpectedCall::new("a"));
        assert_eq!(parsed[1].arguments.as_ref().map(|m| m.len()), Some(1));
    }

    #[test]
    fn test_score_is_fraction_matched() {
        let out = match_sequence(
            MatchMode::InOrderMatch,
            &expected(&["a", "b", "c", "d"]),
            &actual(&["a", "b"]),
            false,
        );
        assert_eq!(out.score(4), 0.5);
    }
}
