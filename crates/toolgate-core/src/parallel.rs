//! Parallel dataset evaluation.
//!
//! Items are split into contiguous chunks and graded on tokio's blocking
//! pool. Each chunk carries its index, so results are reassembled in input
//! order no matter which worker finishes first.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;

use crate::domain::error::{Result, ToolgateError};
use crate::obs;
use crate::runner::{DatasetItem, DatasetReport, Evaluator, ItemOutcome};

/// Grade `items` with up to `concurrency` workers.
///
/// Output is identical to [`Evaluator::evaluate_dataset`] for the same
/// input. A `concurrency` of 0 is treated as 1.
pub async fn evaluate_dataset_parallel(
    evaluator: Arc<Evaluator>,
    items: Vec<DatasetItem>,
    concurrency: usize,
) -> Result<DatasetReport> {
    let _span = obs::EvalSpan::enter(evaluator.name(), evaluator.digest());
    obs::emit_evaluation_started(evaluator.name(), evaluator.rules().len(), items.len());
    let started = Instant::now();

    let workers = concurrency.max(1);
    let chunk_size = items.len().div_ceil(workers).max(1);

    let mut chunks: Vec<Vec<DatasetItem>> = Vec::new();
    let mut rest = items.into_iter().peekable();
    while rest.peek().is_some() {
        chunks.push(rest.by_ref().take(chunk_size).collect());
    }

    let mut join_set = JoinSet::new();
    for (idx, chunk) in chunks.into_iter().enumerate() {
        let evaluator = Arc::clone(&evaluator);
        join_set.spawn_blocking(move || {
            let outcomes: Vec<ItemOutcome> = chunk.iter().map(|item| evaluator.evaluate_item(item)).collect();
            (idx, outcomes)
        });
    }

    let mut ordered: Vec<Option<Vec<ItemOutcome>>> = vec![None; join_set.len()];
    while let Some(joined) = join_set.join_next().await {
        let (idx, outcomes) =
            joined.map_err(|e| ToolgateError::Worker(format!("evaluation task join error: {e}")))?;
        ordered[idx] = Some(outcomes);
    }

    let mut outcomes = Vec::new();
    for (idx, slot) in ordered.into_iter().enumerate() {
        let chunk = slot.ok_or_else(|| ToolgateError::Worker(format!("missing results for chunk {idx}")))?;
        outcomes.extend(chunk);
    }

    let report = DatasetReport::from_outcomes(evaluator.digest().to_string(), outcomes);
    obs::emit_evaluation_finished(
        evaluator.name(),
        report.items.len(),
        report.quarantined.len(),
        started.elapsed().as_millis() as u64,
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::{Rule, RuleSet};
    use crate::extract::ExtractorRegistry;
    use serde_json::json;

    fn evaluator() -> Arc<Evaluator> {
        let set = RuleSet::new("seq", "1").with_rule(
            Rule::new("flow", "sequence_conformance")
                .with_params(json!({"expected": ["lookup"], "mode": "in_order_match"})),
        );
        Arc::new(Evaluator::new(&set, &ExtractorRegistry::with_builtins()).expect("compiles"))
    }

    fn items(n: usize) -> Vec<DatasetItem> {
        (0..n)
            .map(|i| {
                let tool = if i % 3 == 0 { "other" } else { "lookup" };
                let raw = if i % 7 == 6 {
                    json!("not a thread")
                } else {
                    json!([
                        {"role": "user", "content": "hi"},
                        {"role": "assistant", "content": [{"type": "tool_call", "tool_call_id": "c1", "name": tool, "arguments": {}}]}
                    ])
                };
                DatasetItem::new(format!("item-{i}"), raw)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let eval = evaluator();
        let data = items(23);
        let sequential = eval.evaluate_dataset(&data);
        let parallel = evaluate_dataset_parallel(Arc::clone(&eval), data, 4)
            .await
            .expect("parallel run");
        assert_eq!(parallel, sequential);
        assert_eq!(parallel.quarantined.len(), 3);
    }

    #[tokio::test]
    async fn test_zero_concurrency_and_empty_input() {
        let report = evaluate_dataset_parallel(evaluator(), Vec::new(), 0)
            .await
            .expect("empty run");
        assert!(report.items.is_empty());
        assert!(report.quarantined.is_empty());
    }

    #[tokio::test]
    async fn test_more_workers_than_items() {
        let report = evaluate_dataset_parallel(evaluator(), items(2), 16)
            .await
            .expect("run");
        let ids: Vec<_> = report.items.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(ids, vec!["item-0", "item-1"]);
    }
}
