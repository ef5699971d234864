//! Toolgate Core Library
//!
//! Deterministic grading of recorded agent threads against declarative
//! tool-use rules, plus aggregation and baseline/candidate comparison.

pub mod aggregate;
pub mod config;
pub mod domain;
pub mod extract;
pub mod grader;
pub mod matching;
pub mod metrics;
pub mod obs;
pub mod parallel;
pub mod query;
pub mod reporting;
pub mod runner;
pub mod telemetry;

pub use domain::{
    ComparisonConfig, ConfigurationError, ContentBlock, DesiredDirection, ExtractorSpec, ItemResult,
    MalformedThreadError, MatchMode, Message, QuarantinedItem, Result, Role, Rule, RuleSet, Thread,
    ThreadPrefix, ToolCall, ToolDefinition, ToolResult, ToolgateError, Verdict,
};

pub use aggregate::{
    aggregate, classify, compare, two_proportion_test, AggregateResult, ComparisonReport,
    RuleAggregate, RuleComparison, Significance,
};
pub use config::load_rule_set;
pub use extract::{
    ExtractedFactSet, Extraction, Extractor, ExtractorRegistry, FactKind, FactValue, FnExtractor,
};
pub use grader::{compile_rule, CompiledRule, Grader};
pub use matching::{match_sequence, ExpectedCall, MatchOutcome};
pub use metrics::METRICS;
pub use parallel::evaluate_dataset_parallel;
pub use query::{referenced_identifiers, QueryLanguage, QuerySyntaxError};
pub use reporting::{
    read_results_json, render_aggregate_md, render_comparison_md, write_markdown,
    write_results_json, ResultsArtifact, RuleSetIdentity,
};
pub use runner::{parse_dataset_jsonl, DatasetItem, DatasetReport, Evaluator, ItemOutcome};
pub use telemetry::init_tracing;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
