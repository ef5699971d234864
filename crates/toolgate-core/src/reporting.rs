use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::aggregate::{AggregateResult, ComparisonReport};
use crate::domain::rule::ComparisonConfig;
use crate::domain::verdict::{ItemResult, QuarantinedItem};
use crate::runner::{DatasetReport, Evaluator};

pub const RESULTS_SCHEMA_VERSION: &str = "1.0";

/// Identity of the rule set a results artifact was produced with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleSetIdentity {
    pub name: String,
    pub version: String,
    pub digest: String,
}

/// Persisted results of one evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultsArtifact {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    pub report_id: Uuid,
    pub rule_set: RuleSetIdentity,
    /// Thresholds to use when this run is compared against another.
    #[serde(default)]
    pub comparison: ComparisonConfig,
    pub items: Vec<ItemResult>,
    pub quarantined: Vec<QuarantinedItem>,
    pub aggregate: AggregateResult,
}

impl ResultsArtifact {
    /// Build an artifact for `report`, recomputing the aggregate from its
    /// item results.
    pub fn new(evaluator: &Evaluator, report: DatasetReport) -> Self {
        let aggregate = evaluator.aggregate(&report);
        Self {
            schema_version: RESULTS_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            report_id: Uuid::new_v4(),
            rule_set: RuleSetIdentity {
                name: evaluator.name().to_string(),
                version: evaluator.version().to_string(),
                digest: report.rule_set_digest,
            },
            comparison: *evaluator.comparison(),
            items: report.items,
            quarantined: report.quarantined,
            aggregate,
        }
    }
}

/// Write a results artifact as pretty JSON.
pub fn write_results_json(path: &Path, artifact: &ResultsArtifact) -> Result<()> {
    let content = serde_json::to_string_pretty(artifact).context("serialize results artifact")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Read a results artifact written by [`write_results_json`].
pub fn read_results_json(path: &Path) -> Result<ResultsArtifact> {
    let content = std::fs::read_to_string(path).with_context(|| format!("read {:?}", path))?;
    let artifact = serde_json::from_str(&content).with_context(|| format!("parse results artifact {:?}", path))?;
    Ok(artifact)
}

/// Render the per-rule pass-rate table.
pub fn render_aggregate_md(aggregate: &AggregateResult) -> String {
    let mut out = String::new();
    out.push_str("# Evaluation Summary\n\n");
    out.push_str(&format!(
        "- items graded: {}\n- items quarantined: {}\n\n",
        aggregate.total_items, aggregate.quarantined_items
    ));

    out.push_str("| rule | passed | total | pass rate | mean score |\n");
    out.push_str("|---|---|---|---|---|\n");
    for (rule, agg) in &aggregate.per_rule {
        let mean = agg
            .mean_score
            .map(|s| format!("{s:.3}"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "| `{}` | {} | {} | {:.1}% | {} |\n",
            rule,
            agg.passed,
            agg.total,
            agg.pass_rate * 100.0,
            mean
        ));
    }
    out
}

/// Render a baseline/candidate comparison.
pub fn render_comparison_md(report: &ComparisonReport) -> String {
    let mut out = String::new();
    out.push_str("# Comparison\n\n");
    out.push_str("| rule | baseline | candidate | delta | p-value | classification |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for rule in &report.rules {
        let p = rule
            .p_value
            .map(|p| format!("{p:.4}"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "| `{}` | {:.1}% (n={}) | {:.1}% (n={}) | {:+.1}pp | {} | {} |\n",
            rule.rule,
            rule.baseline_pass_rate * 100.0,
            rule.baseline_total,
            rule.candidate_pass_rate * 100.0,
            rule.candidate_total,
            rule.delta * 100.0,
            p,
            rule.classification.as_str()
        ));
    }

    if !report.baseline_only.is_empty() {
        out.push_str("\n### Only in baseline\n");
        for r in &report.baseline_only {
            out.push_str(&format!("- `{}`\n", r));
        }
    }
    if !report.candidate_only.is_empty() {
        out.push_str("\n### Only in candidate\n");
        for r in &report.candidate_only {
            out.push_str(&format!("- `{}`\n", r));
        }
    }
    out
}

/// Write a markdown document.
pub fn write_markdown(path: &Path, markdown: &str) -> Result<()> {
    std::fs::write(path, markdown).with_context(|| format!("write {:?}", path))?;
    Ok(())
}
