use serde_json::{json, Value};
use toolgate_core::{
    Evaluator, ExtractorRegistry, ExtractorSpec, ItemOutcome, DatasetItem, Rule, RuleSet, Thread,
};

fn rule(params: Value) -> RuleSet {
    RuleSet::new("db-assistant", "1").with_rule(
        Rule::new("tables_discovered", "containment")
            .with_extractor(
                "allow_list",
                ExtractorSpec::new("provenance", json!({"tools": ["search_tables"], "path": "tables"})),
            )
            .with_params(params),
    )
}

fn default_rule() -> RuleSet {
    rule(json!({
        "target_tools": ["query_database"],
        "reference": {"source": "query", "argument": "sql"}
    }))
}

fn thread_with_sql(sql: &str) -> Thread {
    Thread::from_value(&json!([
        {"role": "user", "content": "How many orders per customer?"},
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "t1", "name": "search_tables", "arguments": {"keyword": "order"}}
        ]},
        {"role": "tool", "tool_call_id": "t1", "content": [
            {"type": "tool_result", "tool_result": {"tables": ["orders", "customers"]}}
        ]},
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "q1", "name": "query_database", "arguments": {"sql": sql}}
        ]}
    ]))
    .expect("valid thread")
}

fn evaluate(set: &RuleSet, thread: &Thread) -> toolgate_core::Verdict {
    let evaluator = Evaluator::new(set, &ExtractorRegistry::with_builtins()).expect("compiles");
    evaluator
        .evaluate_thread("t", thread)
        .verdicts
        .remove("tables_discovered")
        .expect("verdict present")
}

// ---- discovered tables ----

#[test]
fn query_over_discovered_tables_passes() {
    let verdict = evaluate(
        &default_rule(),
        &thread_with_sql("SELECT c.name, COUNT(*) FROM orders o JOIN customers c ON o.cid = c.id GROUP BY c.name"),
    );
    assert!(verdict.passed, "{}", verdict.reason);
    assert_eq!(verdict.score, Some(1.0));
}

#[test]
fn undiscovered_table_fails_and_is_cited() {
    let verdict = evaluate(
        &default_rule(),
        &thread_with_sql("SELECT * FROM orders JOIN products ON orders.pid = products.id"),
    );
    assert!(!verdict.passed);
    assert_eq!(verdict.evidence, vec!["products".to_string()]);
    assert!(verdict.reason.contains("products"));
    assert_eq!(verdict.score, Some(0.0));
}

#[test]
fn quoting_and_case_do_not_matter() {
    let verdict = evaluate(&default_rule(), &thread_with_sql(r#"SELECT * FROM "Orders""#));
    assert!(verdict.passed, "{}", verdict.reason);
}

#[test]
fn cte_names_are_not_treated_as_tables() {
    let verdict = evaluate(
        &default_rule(),
        &thread_with_sql("WITH recent AS (SELECT * FROM orders) SELECT * FROM recent"),
    );
    assert!(verdict.passed, "{}", verdict.reason);
}

#[test]
fn unparseable_query_fails_without_panicking() {
    let verdict = evaluate(&default_rule(), &thread_with_sql("SELECT * FROM (orders"));
    assert!(!verdict.passed);
    assert!(verdict.reason.contains("containment cannot be established"));
}

// ---- prefix visibility ----

#[test]
fn discovery_after_the_call_does_not_count() {
    let thread = Thread::from_value(&json!([
        {"role": "user", "content": "orders?"},
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "q1", "name": "query_database", "arguments": {"sql": "SELECT * FROM orders"}}
        ]},
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "t1", "name": "search_tables", "arguments": {}}
        ]},
        {"role": "tool", "tool_call_id": "t1", "content": [
            {"type": "tool_result", "tool_result": {"tables": ["orders"]}}
        ]}
    ]))
    .expect("valid thread");

    let verdict = evaluate(&default_rule(), &thread);
    assert!(!verdict.passed);
    assert_eq!(verdict.evidence, vec!["orders".to_string()]);
}

#[test]
fn discovery_later_in_the_same_message_does_not_count() {
    let thread = Thread::from_value(&json!([
        {"role": "user", "content": "orders?"},
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "q1", "name": "query_database", "arguments": {"sql": "SELECT * FROM orders"}},
            {"type": "tool_call", "tool_call_id": "t1", "name": "search_tables", "arguments": {}},
            {"type": "tool_result", "tool_call_id": "t1", "tool_result": {"tables": ["orders"]}}
        ]}
    ]))
    .expect("valid thread");

    let verdict = evaluate(&default_rule(), &thread);
    assert!(!verdict.passed);
    assert_eq!(verdict.evidence, vec!["orders".to_string()]);
}

#[test]
fn every_target_call_is_graded() {
    let thread = Thread::from_value(&json!([
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "t1", "name": "search_tables", "arguments": {}}
        ]},
        {"role": "tool", "tool_call_id": "t1", "content": [
            {"type": "tool_result", "tool_result": {"tables": ["orders"]}}
        ]},
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "q1", "name": "query_database", "arguments": {"sql": "SELECT * FROM orders"}}
        ]},
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "q2", "name": "query_database", "arguments": {"sql": "SELECT * FROM refunds"}}
        ]}
    ]))
    .expect("valid thread");

    let verdict = evaluate(&default_rule(), &thread);
    assert!(!verdict.passed);
    assert_eq!(verdict.evidence, vec!["refunds".to_string()]);
    assert_eq!(verdict.score, Some(0.5));
    assert!(verdict.reason.contains("q2"));
}

// ---- parameters ----

#[test]
fn no_target_call_passes_unless_required() {
    let thread = Thread::from_value(&json!([{"role": "user", "content": "hello"}])).expect("valid");
    assert!(evaluate(&default_rule(), &thread).passed);

    let strict = rule(json!({
        "target_tools": ["query_database"],
        "reference": {"source": "query", "argument": "sql"},
        "require_target": true
    }));
    assert!(!evaluate(&strict, &thread).passed);
}

#[test]
fn ignore_schema_compares_last_segment() {
    let sql = "SELECT * FROM sales.orders";
    assert!(!evaluate(&default_rule(), &thread_with_sql(sql)).passed);

    let relaxed = rule(json!({
        "target_tools": ["query_database"],
        "reference": {"source": "query", "argument": "sql"},
        "ignore_schema": true
    }));
    assert!(evaluate(&relaxed, &thread_with_sql(sql)).passed);
}

#[test]
fn argument_reference_reads_identifiers_directly() {
    let set = rule(json!({
        "target_tools": ["describe_tables"],
        "reference": {"source": "argument", "argument": "tables"}
    }));
    let thread = Thread::from_value(&json!([
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "t1", "name": "search_tables", "arguments": {}}
        ]},
        {"role": "tool", "tool_call_id": "t1", "content": [
            {"type": "tool_result", "tool_result": {"tables": ["orders"]}}
        ]},
        {"role": "assistant", "content": [
            {"type": "tool_call", "tool_call_id": "d1", "name": "describe_tables", "arguments": {"tables": ["ORDERS", "ledger"]}}
        ]}
    ]))
    .expect("valid thread");

    let verdict = evaluate(&set, &thread);
    assert!(!verdict.passed);
    assert_eq!(verdict.evidence, vec!["ledger".to_string()]);
}

#[test]
fn raw_dataset_item_grades_end_to_end() {
    let evaluator = Evaluator::new(&default_rule(), &ExtractorRegistry::with_builtins()).expect("compiles");
    let item = DatasetItem::new(
        "row-1",
        json!({
            "query": "orders?",
            "response": [
                {"role": "assistant", "content": [
                    {"type": "tool_call", "tool_call_id": "t1", "name": "search_tables", "arguments": "{\"keyword\": \"orders\"}"}
                ]},
                {"role": "tool", "tool_call_id": "t1", "content": [
                    {"type": "tool_result", "tool_result": "{\"tables\": [\"orders\"]}"}
                ]},
                {"role": "assistant", "content": [
                    {"type": "tool_call", "tool_call_id": "q1", "name": "query_database", "arguments": {"sql": "select count(*) from orders"}}
                ]}
            ]
        }),
    );
    match evaluator.evaluate_item(&item) {
        ItemOutcome::Graded(result) => assert!(result.all_passed()),
        ItemOutcome::Quarantined(q) => panic!("unexpected quarantine: {}", q.defect),
    }
}
