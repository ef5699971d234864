use serde_json::{json, Value};
use toolgate_core::{Evaluator, ExtractorRegistry, ExtractorSpec, Rule, RuleSet, Thread, Verdict};

fn thread(calls: &[(&str, Value)]) -> Thread {
    let mut messages = vec![json!({"role": "user", "content": "What were last month's sales?"})];
    for (i, (name, args)) in calls.iter().enumerate() {
        let id = format!("call_{i}");
        messages.push(json!({"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": id, "name": name, "arguments": args}
        ]}));
        messages.push(json!({"role": "tool", "tool_call_id": id, "content": [
            {"type": "tool_result", "tool_result": {"ok": true}}
        ]}));
    }
    Thread::from_value(&Value::Array(messages)).expect("valid thread")
}

fn grade(rule: Rule, thread: &Thread) -> Verdict {
    let name = rule.name.clone();
    let set = RuleSet::new("seq", "1").with_rule(rule);
    let evaluator = Evaluator::new(&set, &ExtractorRegistry::with_builtins()).expect("compiles");
    evaluator
        .evaluate_thread("t", thread)
        .verdicts
        .remove(&name)
        .expect("verdict present")
}

fn flow(mode: &str, expected: Value) -> Rule {
    Rule::new("flow", "sequence_conformance").with_params(json!({"expected": expected, "mode": mode}))
}

// ---- modes ----

#[test]
fn in_order_tolerates_extras_exact_does_not() {
    let t = thread(&[
        ("search_tables", json!({})),
        ("describe_table", json!({})),
        ("query_database", json!({})),
    ]);
    let expected = json!(["search_tables", "query_database"]);

    let in_order = grade(flow("in_order_match", expected.clone()), &t);
    assert!(in_order.passed, "{}", in_order.reason);
    assert_eq!(in_order.score, Some(1.0));

    let exact = grade(flow("exact_match", expected), &t);
    assert!(!exact.passed);
    assert!(exact.evidence.contains(&"unexpected:describe_table".to_string()));
}

#[test]
fn in_order_rejects_reordering() {
    let t = thread(&[("query_database", json!({})), ("search_tables", json!({}))]);
    let verdict = grade(flow("in_order_match", json!(["search_tables", "query_database"])), &t);
    assert!(!verdict.passed);
    assert_eq!(verdict.score, Some(0.5));
}

#[test]
fn any_order_accepts_permutation_but_not_extras() {
    let t = thread(&[("query_database", json!({})), ("search_tables", json!({}))]);
    let expected = json!(["search_tables", "query_database"]);
    assert!(grade(flow("any_order_match", expected.clone()), &t).passed);

    let with_extra = thread(&[
        ("query_database", json!({})),
        ("search_tables", json!({})),
        ("search_tables", json!({})),
    ]);
    let verdict = grade(flow("any_order_match", expected), &with_extra);
    assert!(!verdict.passed);
    assert!(verdict.evidence.contains(&"unexpected:search_tables".to_string()));
}

#[test]
fn missing_call_is_reported() {
    let t = thread(&[("search_tables", json!({}))]);
    let verdict = grade(flow("exact_match", json!(["search_tables", "query_database"])), &t);
    assert!(!verdict.passed);
    assert!(verdict.evidence.contains(&"missing:query_database".to_string()));
    assert!(verdict.reason.contains("query_database"));
}

// ---- arguments ----

#[test]
fn argument_check_uses_structural_equality() {
    let t = thread(&[("query_database", json!({"limit": 10.0, "filter": {"b": 2, "a": 1}}))]);
    let rule = Rule::new("flow", "sequence_conformance").with_params(json!({
        "expected": [{"name": "query_database", "arguments": {"filter": {"a": 1, "b": 2}, "limit": 10}}],
        "mode": "exact_match",
        "check_arguments": true
    }));
    let verdict = grade(rule, &t);
    assert!(verdict.passed, "{}", verdict.reason);
}

#[test]
fn argument_mismatch_names_the_key() {
    let t = thread(&[("query_database", json!({"limit": "10"}))]);
    let rule = Rule::new("flow", "sequence_conformance").with_params(json!({
        "expected": [{"name": "query_database", "arguments": {"limit": 10}}],
        "check_arguments": true
    }));
    let verdict = grade(rule, &t);
    assert!(!verdict.passed);
    assert!(verdict.evidence.contains(&"arguments:query_database".to_string()));
    assert!(verdict.reason.contains("limit"));
}

// ---- extractor binding ----

#[test]
fn harness_tools_can_be_excluded() {
    let t = thread(&[
        ("mcp_list_tools", json!({})),
        ("search_tables", json!({})),
        ("query_database", json!({})),
    ]);
    let rule = flow("exact_match", json!(["search_tables", "query_database"])).with_extractor(
        "actual_calls",
        ExtractorSpec::new("sequence", json!({"exclude_tools": ["mcp_list_tools"]})),
    );
    assert!(grade(rule, &t).passed);
}

#[test]
fn set_extractor_in_calls_slot_is_rejected() {
    let rule = flow("exact_match", json!(["search_tables"])).with_extractor(
        "actual_calls",
        ExtractorSpec::new("called_tools", json!({})),
    );
    let set = RuleSet::new("seq", "1").with_rule(rule);
    let err = Evaluator::new(&set, &ExtractorRegistry::with_builtins()).unwrap_err();
    assert!(matches!(err, toolgate_core::ConfigurationError::FactKindMismatch { .. }));
}

#[test]
fn empty_thread_fails_exact_match() {
    let t = thread(&[]);
    let verdict = grade(flow("exact_match", json!(["search_tables"])), &t);
    assert!(!verdict.passed);
    assert_eq!(verdict.score, Some(0.0));
}
