//! Evaluation runner: applies every compiled rule to each thread.
//!
//! Rules are independent. A failing rule never stops the others, and a
//! malformed thread never stops the dataset: it is quarantined with its
//! defect and the run continues.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::{aggregate, AggregateResult};
use crate::domain::error::ConfigurationError;
use crate::domain::rule::{ComparisonConfig, DesiredDirection, RuleSet};
use crate::domain::thread::Thread;
use crate::domain::verdict::{ItemResult, QuarantinedItem};
use crate::extract::ExtractorRegistry;
use crate::grader::{compile_rule, CompiledRule};
use crate::metrics::METRICS;
use crate::obs;

/// One raw input item awaiting evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetItem {
    pub id: String,
    pub raw: Value,
}

impl DatasetItem {
    pub fn new(id: impl Into<String>, raw: Value) -> Self {
        Self { id: id.into(), raw }
    }
}

/// Either a graded item or a quarantined one.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Graded(ItemResult),
    Quarantined(QuarantinedItem),
}

/// Per-item results for a whole dataset, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetReport {
    pub rule_set_digest: String,
    pub items: Vec<ItemResult>,
    pub quarantined: Vec<QuarantinedItem>,
}

impl DatasetReport {
    pub(crate) fn from_outcomes(rule_set_digest: String, outcomes: Vec<ItemOutcome>) -> Self {
        let mut items = Vec::new();
        let mut quarantined = Vec::new();
        for outcome in outcomes {
            match outcome {
                ItemOutcome::Graded(result) => items.push(result),
                ItemOutcome::Quarantined(q) => quarantined.push(q),
            }
        }
        Self {
            rule_set_digest,
            items,
            quarantined,
        }
    }

    /// Append items quarantined before evaluation (e.g. unparseable input
    /// lines).
    pub fn with_quarantined(mut self, extra: Vec<QuarantinedItem>) -> Self {
        self.quarantined.extend(extra);
        self
    }
}

/// Split JSONL text into dataset items.
///
/// Blank lines are skipped. An `id` field (string or number) names the
/// item, otherwise it is `item-<line>`. Lines that are not JSON come back
/// as quarantined items.
pub fn parse_dataset_jsonl(text: &str) -> (Vec<DatasetItem>, Vec<QuarantinedItem>) {
    let mut items = Vec::new();
    let mut quarantined = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(raw) => {
                let id = match raw.get("id") {
                    Some(Value::String(id)) if !id.is_empty() => id.clone(),
                    Some(Value::Number(n)) => n.to_string(),
                    _ => format!("item-{line_no}"),
                };
                items.push(DatasetItem { id, raw });
            }
            Err(e) => quarantined.push(QuarantinedItem {
                item_id: format!("item-{line_no}"),
                defect: format!("line {line_no} is not valid JSON: {e}"),
            }),
        }
    }

    (items, quarantined)
}

/// A compiled rule set, ready to grade threads.
///
/// Immutable after construction; share it across workers behind an `Arc`.
#[derive(Debug)]
pub struct Evaluator {
    name: String,
    version: String,
    digest: String,
    comparison: ComparisonConfig,
    rules: Vec<CompiledRule>,
}

impl Evaluator {
    /// Compile `rule_set` against `registry`. Every configuration problem
    /// is reported here, before any thread is processed.
    pub fn new(rule_set: &RuleSet, registry: &ExtractorRegistry) -> Result<Self, ConfigurationError> {
        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(rule_set.rules.len());
        for rule in &rule_set.rules {
            if !rule.name.trim().is_empty() && !seen.insert(rule.name.as_str()) {
                return Err(ConfigurationError::DuplicateRule(rule.name.clone()));
            }
            rules.push(compile_rule(rule, registry)?);
        }

        let digest = rule_set
            .digest()
            .map_err(|e| ConfigurationError::InvalidDocument(e.to_string()))?;

        Ok(Self {
            name: rule_set.name.clone(),
            version: rule_set.version.clone(),
            digest,
            comparison: rule_set.comparison,
            rules,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// SHA-256 digest of the rule set this evaluator was compiled from.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn comparison(&self) -> &ComparisonConfig {
        &self.comparison
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn directions(&self) -> BTreeMap<String, DesiredDirection> {
        self.rules
            .iter()
            .map(|r| (r.name.clone(), r.direction))
            .collect()
    }

    /// Grade one validated thread against every rule.
    pub fn evaluate_thread(&self, item_id: &str, thread: &Thread) -> ItemResult {
        let mut verdicts = BTreeMap::new();
        for rule in &self.rules {
            let verdict = rule.evaluate(thread);
            METRICS.record_verdict(verdict.passed);
            obs::emit_rule_evaluated(item_id, &rule.name, verdict.passed);
            verdicts.insert(rule.name.clone(), verdict);
        }
        METRICS.inc_threads_evaluated();
        ItemResult {
            item_id: item_id.to_string(),
            verdicts,
        }
    }

    /// Parse and grade one raw item, quarantining it if malformed.
    pub fn evaluate_item(&self, item: &DatasetItem) -> ItemOutcome {
        match Thread::from_value(&item.raw) {
            Ok(thread) => ItemOutcome::Graded(self.evaluate_thread(&item.id, &thread)),
            Err(defect) => {
                METRICS.inc_threads_quarantined();
                obs::emit_thread_quarantined(&item.id, &defect);
                ItemOutcome::Quarantined(QuarantinedItem {
                    item_id: item.id.clone(),
                    defect: defect.to_string(),
                })
            }
        }
    }

    /// Grade a dataset sequentially, preserving input order.
    pub fn evaluate_dataset(&self, items: &[DatasetItem]) -> DatasetReport {
        let _span = obs::EvalSpan::enter(&self.name, &self.digest);
        obs::emit_evaluation_started(&self.name, self.rules.len(), items.len());
        let started = Instant::now();

        let outcomes = items.iter().map(|item| self.evaluate_item(item)).collect();
        let report = DatasetReport::from_outcomes(self.digest.clone(), outcomes);

        obs::emit_evaluation_finished(
            &self.name,
            report.items.len(),
            report.quarantined.len(),
            started.elapsed().as_millis() as u64,
        );
        report
    }

    /// Per-rule pass rates for `report`.
    pub fn aggregate(&self, report: &DatasetReport) -> AggregateResult {
        aggregate(&report.items, report.quarantined.len(), &self.directions())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{ExtractorSpec, Rule};
    use serde_json::json;

    fn rule_set() -> RuleSet {
        RuleSet::new("db", "1")
            .with_rule(
                Rule::new("tables_discovered", "containment")
                    .with_extractor(
                        "allow_list",
                        ExtractorSpec::new("provenance", json!({"tools": ["search_tables"], "path": "tables"})),
                    )
                    .with_params(json!({
                        "target_tools": ["query_database"],
                        "reference": {"source": "query", "argument": "sql"}
                    })),
            )
            .with_rule(
                Rule::new("flow", "sequence_conformance")
                    .with_params(json!({"expected": ["search_tables", "query_database"], "mode": "exact_match"})),
            )
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(&rule_set(), &ExtractorRegistry::with_builtins()).expect("compiles")
    }

    fn item(id: &str, sql: &str) -> DatasetItem {
        DatasetItem::new(
            id,
            json!([
                {"role": "user", "content": "orders?"},
                {"role": "assistant", "content": [{"type": "tool_call", "tool_call_id": "a", "name": "list_tables", "arguments": {}}]},
                {"role": "tool", "tool_call_id": "a", "content": [{"type": "tool_result", "tool_result": {"tables": []}}]},
                {"role": "assistant", "content": [{"type": "tool_call", "tool_call_id": "b", "name": "search_tables", "arguments": {}}]},
                {"role": "tool", "tool_call_id": "b", "content": [{"type": "tool_result", "tool_result": {"tables": ["orders"]}}]},
                {"role": "assistant", "content": [{"type": "tool_call", "tool_call_id": "c", "name": "query_database", "arguments": {"sql": sql}}]}
            ]),
        )
    }

    #[test]
    fn test_every_rule_produces_a_verdict() {
        let result = evaluator().evaluate_thread(
            "x",
            &Thread::from_value(&item("x", "SELECT * FROM products").raw).expect("valid"),
        );
        assert_eq!(result.verdicts.len(), 2);
        assert!(!result.verdict("tables_discovered").map(|v| v.passed).unwrap_or(true));
        assert!(!result.verdict("flow").map(|v| v.passed).unwrap_or(true));
    }

    #[test]
    fn test_malformed_item_is_quarantined_not_fatal() {
        let items = vec![
            item("good", "SELECT * FROM orders"),
            DatasetItem::new(
                "bad",
                json!([{"role": "tool", "content": [{"type": "tool_result", "tool_call_id": "ghost"}]}]),
            ),
            item("also-good", "SELECT * FROM orders"),
        ];
        let report = evaluator().evaluate_dataset(&items);
        let ids: Vec<_> = report.items.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["good", "also-good"]);
        assert_eq!(report.quarantined.len(), 1);
        assert_eq!(report.quarantined[0].item_id, "bad");
        assert!(report.quarantined[0].defect.contains("ghost"));
    }

    #[test]
    fn test_duplicate_rule_names_rejected() {
        let set = rule_set().with_rule(Rule::new("flow", "tool_definition_coverage"));
        assert_eq!(
            Evaluator::new(&set, &ExtractorRegistry::with_builtins()).unwrap_err(),
            ConfigurationError::DuplicateRule("flow".to_string())
        );
    }

    #[test]
    fn test_configuration_error_raised_before_any_thread() {
        let set = rule_set().with_rule(Rule::new("judge", "llm_judge"));
        assert!(matches!(
            Evaluator::new(&set, &ExtractorRegistry::with_builtins()),
            Err(ConfigurationError::UnknownGrader { .. })
        ));
    }

    #[test]
    fn test_report_carries_rule_set_digest() {
        let eval = evaluator();
        let report = eval.evaluate_dataset(&[item("a", "SELECT * FROM orders")]);
        assert_eq!(report.rule_set_digest, eval.digest());
        assert_eq!(eval.digest(), rule_set().digest().expect("digest"));
    }

    #[test]
    fn test_parse_dataset_jsonl() {
        let text = "{\"id\": \"first\", \"messages\": []}\n\n{\"messages\": []}\nnot json\n{\"id\": 7, \"messages\": []}\n";
        let (items, quarantined) = parse_dataset_jsonl(text);
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "item-3", "7"]);
        assert_eq!(quarantined.len(), 1);
        assert_eq!(quarantined[0].item_id, "item-4");
    }
}
