//! Structured observability hooks for evaluation lifecycle events.
//!
//! - `EvalSpan` RAII guard tagging everything inside an evaluation run
//! - emit functions for start, per-rule verdict, quarantine, finish and
//!   comparison classification
//!
//! Filtering follows `RUST_LOG`; see [`crate::telemetry::init_tracing`].

use tracing::{debug, info, warn};

/// RAII guard that enters an evaluation-scoped tracing span.
///
/// ```ignore
/// let _span = EvalSpan::enter("db-assistant", "3f2a…");
/// ```
pub struct EvalSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvalSpan {
    pub fn enter(rule_set: &str, digest: &str) -> Self {
        let span = tracing::info_span!("toolgate.eval", rule_set = %rule_set, digest = %digest);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: dataset evaluation started.
pub fn emit_evaluation_started(rule_set: &str, rules: usize, items: usize) {
    info!(event = "evaluation.started", rule_set = %rule_set, rules = rules, items = items);
}

/// Emit event: one rule graded against one item (debug level).
pub fn emit_rule_evaluated(item_id: &str, rule: &str, passed: bool) {
    debug!(event = "rule.evaluated", item_id = %item_id, rule = %rule, passed = passed);
}

/// Emit event: an item was excluded because its thread is malformed.
pub fn emit_thread_quarantined(item_id: &str, defect: &dyn std::fmt::Display) {
    warn!(event = "thread.quarantined", item_id = %item_id, defect = %defect);
}

pub fn emit_evaluation_finished(rule_set: &str, graded: usize, quarantined: usize, duration_ms: u64) {
    info!(
        event = "evaluation.finished",
        rule_set = %rule_set,
        graded = graded,
        quarantined = quarantined,
        duration_ms = duration_ms,
    );
}

/// Emit event: a rule's baseline/candidate difference was classified.
pub fn emit_comparison_classified(rule: &str, classification: &str, p_value: Option<f64>) {
    info!(
        event = "comparison.classified",
        rule = %rule,
        classification = %classification,
        p_value = p_value.unwrap_or(f64::NAN),
    );
}
