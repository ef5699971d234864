//! Rule/grader protocol.
//!
//! A rule names one of a closed set of grader variants. Compiling the rule
//! binds its fact slots to registry extractors and validates its params;
//! every configuration problem surfaces here, before any thread is seen.
//!
//! Graders never raise on data. Unparseable queries, missing arguments and
//! empty fact sets all become failing [`Verdict`]s with a reason.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::domain::error::ConfigurationError;
use crate::domain::rule::{DesiredDirection, ExtractorSpec, MatchMode, Rule};
use crate::domain::thread::{Thread, ThreadPrefix, ToolCall};
use crate::domain::verdict::Verdict;
use crate::extract::{
    collect_strings, BoundExtractor, CallRecord, ExtractedFactSet, ExtractorRegistry, FactKind,
    CALLED_TOOLS, DEFINED_TOOLS, SEQUENCE,
};
use crate::matching::{match_sequence, ExpectedCall, MatchOutcome};
use crate::metrics::METRICS;
use crate::query::{normalize_identifier, referenced_identifiers, QueryLanguage};

pub const CONTAINMENT: &str = "containment";
pub const SEQUENCE_CONFORMANCE: &str = "sequence_conformance";
pub const TOOL_DEFINITION_COVERAGE: &str = "tool_definition_coverage";

/// Every grader name a rule may use.
pub const GRADERS: &[&str] = &[CONTAINMENT, SEQUENCE_CONFORMANCE, TOOL_DEFINITION_COVERAGE];

/// Capability set shared by all grader variants.
pub trait Grader: Send + Sync {
    /// Facts visible in `prefix`, one entry per bound slot.
    fn extract_facts(&self, prefix: &ThreadPrefix<'_>) -> ExtractedFactSet;

    /// Grade `facts`, optionally against a specific target call.
    fn grade(&self, facts: &ExtractedFactSet, target: Option<&ToolCall>) -> Verdict;

    /// Grade a whole thread. The default grades facts of the full thread
    /// with no target.
    fn evaluate(&self, thread: &Thread) -> Verdict {
        let facts = self.extract_facts(&thread.full());
        self.grade(&facts, None)
    }
}

// ---------------------------------------------------------------------------
// Compilation helpers
// ---------------------------------------------------------------------------

struct Slot {
    name: &'static str,
    kind: FactKind,
    default: Option<&'static str>,
}

fn bind_slots(
    rule: &Rule,
    registry: &ExtractorRegistry,
    slots: &[Slot],
) -> Result<Vec<BoundExtractor>, ConfigurationError> {
    if let Some(unknown) = rule
        .extractors
        .keys()
        .find(|k| !slots.iter().any(|s| s.name == k.as_str()))
    {
        return Err(ConfigurationError::InvalidParams {
            rule: rule.name.clone(),
            detail: format!("unknown fact slot '{unknown}'"),
        });
    }

    slots
        .iter()
        .map(|slot| {
            let spec = match (rule.extractors.get(slot.name), slot.default) {
                (Some(spec), _) => spec.clone(),
                (None, Some(default)) => ExtractorSpec::new(default, Value::Null),
                (None, None) => {
                    return Err(ConfigurationError::MissingFact {
                        rule: rule.name.clone(),
                        slot: slot.name.to_string(),
                    })
                }
            };
            let bound = registry.bind(&rule.name, slot.name, &spec)?;
            if bound.kind != slot.kind {
                return Err(ConfigurationError::FactKindMismatch {
                    rule: rule.name.clone(),
                    slot: slot.name.to_string(),
                    expected: slot.kind.to_string(),
                    actual: bound.kind.to_string(),
                });
            }
            Ok(bound)
        })
        .collect()
}

fn parse_params<T: for<'de> Deserialize<'de>>(rule: &Rule) -> Result<T, ConfigurationError> {
    let params = match &rule.params {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(params).map_err(|e| ConfigurationError::InvalidParams {
        rule: rule.name.clone(),
        detail: e.to_string(),
    })
}

fn invalid(rule: &Rule, detail: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidParams {
        rule: rule.name.clone(),
        detail: detail.into(),
    }
}

fn extract_all(bound: &[BoundExtractor], prefix: &ThreadPrefix<'_>) -> ExtractedFactSet {
    let mut facts = ExtractedFactSet::new();
    for extractor in bound {
        facts.insert(extractor.slot.clone(), extractor.extract(prefix));
    }
    facts
}

/// Append extraction gaps to a failing reason.
fn with_gaps(reason: String, facts: &ExtractedFactSet) -> String {
    let gaps = facts.gaps();
    if gaps.is_empty() {
        reason
    } else {
        format!("{reason} [{}]", gaps.join("; "))
    }
}

// ---------------------------------------------------------------------------
// Containment
// ---------------------------------------------------------------------------

const ALLOW_LIST: &str = "allow_list";

/// Where a target call's referenced identifiers come from.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ReferenceSource {
    /// Parse a query string held in `argument`.
    Query {
        argument: String,
        #[serde(default)]
        language: QueryLanguage,
    },
    /// Take identifiers directly from `argument` (a string or a list).
    Argument { argument: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ContainmentParams {
    target_tools: Vec<String>,
    reference: ReferenceSource,
    #[serde(default)]
    vacuous_pass: bool,
    #[serde(default)]
    ignore_schema: bool,
    #[serde(default)]
    require_target: bool,
}

/// Passes iff every target call references only identifiers discovered
/// earlier in the thread.
///
/// Each call named in `target_tools` is graded against the `allow_list`
/// facts visible as of that call. The rule fails if any call fails; the
/// evidence is the union of out-of-scope identifiers and the score is the
/// fraction of target calls that passed.
#[derive(Debug)]
pub struct ContainmentGrader {
    params: ContainmentParams,
    extractors: Vec<BoundExtractor>,
}

impl ContainmentGrader {
    pub fn compile(rule: &Rule, registry: &ExtractorRegistry) -> Result<Self, ConfigurationError> {
        let params: ContainmentParams = parse_params(rule)?;
        if params.target_tools.is_empty() {
            return Err(invalid(rule, "target_tools must list at least one tool name"));
        }
        let argument = match &params.reference {
            ReferenceSource::Query { argument, .. } | ReferenceSource::Argument { argument } => argument,
        };
        if argument.is_empty() {
            return Err(invalid(rule, "reference argument must not be empty"));
        }
        let extractors = bind_slots(
            rule,
            registry,
            &[Slot {
                name: ALLOW_LIST,
                kind: FactKind::Set,
                default: None,
            }],
        )?;
        Ok(Self { params, extractors })
    }

    fn scoped(&self, name: &str) -> String {
        if self.params.ignore_schema {
            name.rsplit('.').next().unwrap_or(name).to_string()
        } else {
            name.to_string()
        }
    }

    /// Identifiers the call references, or a failing reason.
    fn referenced(&self, call: &ToolCall) -> Result<BTreeSet<String>, String> {
        match &self.params.reference {
            ReferenceSource::Query { argument, language } => {
                let text = match call.arguments.get(argument) {
                    Some(Value::String(text)) => text,
                    Some(_) => return Err(format!("argument '{argument}' is not a query string")),
                    None => return Err(format!("argument '{argument}' is missing")),
                };
                referenced_identifiers(*language, text).map_err(|e| {
                    METRICS.inc_query_parse_failures();
                    format!("containment cannot be established: {e}")
                })
            }
            ReferenceSource::Argument { argument } => {
                let value = call
                    .arguments
                    .get(argument)
                    .ok_or_else(|| format!("argument '{argument}' is missing"))?;
                let mut raw = Vec::new();
                collect_strings(value, "", &mut raw);
                Ok(raw
                    .iter()
                    .map(|s| normalize_identifier(s))
                    .filter(|s| !s.is_empty())
                    .collect())
            }
        }
    }
}

impl Grader for ContainmentGrader {
    fn extract_facts(&self, prefix: &ThreadPrefix<'_>) -> ExtractedFactSet {
        extract_all(&self.extractors, prefix)
    }

    fn grade(&self, facts: &ExtractedFactSet, target: Option<&ToolCall>) -> Verdict {
        let Some(call) = target else {
            return Verdict::fail("no target tool call to grade", Vec::new());
        };

        let referenced: BTreeSet<String> = match self.referenced(call) {
            Ok(set) => set.iter().map(|n| self.scoped(n)).collect(),
            Err(reason) => return Verdict::fail(reason, Vec::new()),
        };
        let allowed: BTreeSet<String> = facts
            .set(ALLOW_LIST)
            .map(|set| set.iter().map(|n| self.scoped(n)).collect())
            .unwrap_or_default();

        if allowed.is_empty() && referenced.is_empty() && !self.params.vacuous_pass {
            return Verdict::fail(
                with_gaps("no identifiers were discovered before the target call".to_string(), facts),
                Vec::new(),
            );
        }

        let missing: Vec<String> = referenced.difference(&allowed).cloned().collect();
        if missing.is_empty() {
            Verdict::pass(format!(
                "all {} referenced identifier(s) were discovered earlier",
                referenced.len()
            ))
        } else {
            Verdict::fail(
                with_gaps(
                    format!("references identifiers not discovered earlier: {}", missing.join(", ")),
                    facts,
                ),
                missing,
            )
        }
    }

    fn evaluate(&self, thread: &Thread) -> Verdict {
        let targets: Vec<_> = thread
            .tool_calls()
            .filter(|r| self.params.target_tools.iter().any(|t| *t == r.call.name))
            .collect();

        if targets.is_empty() {
            let reason = format!(
                "no target tool call ({}) in thread",
                self.params.target_tools.join(", ")
            );
            return if self.params.require_target {
                Verdict::fail(reason, Vec::new())
            } else {
                Verdict::pass(reason)
            };
        }

        let mut passed = 0usize;
        let mut evidence = BTreeSet::new();
        let mut failures = Vec::new();
        for target in &targets {
            let facts = self.extract_facts(&thread.prefix_through(target));
            let verdict = self.grade(&facts, Some(target.call));
            if verdict.passed {
                passed += 1;
            } else {
                failures.push(format!(
                    "{} ({}): {}",
                    target.call.name, target.call.tool_call_id, verdict.reason
                ));
                evidence.extend(verdict.evidence);
            }
        }

        let score = passed as f64 / targets.len() as f64;
        if failures.is_empty() {
            Verdict::pass(format!(
                "{passed} of {} target call(s) stayed within discovered identifiers",
                targets.len()
            ))
            .with_score(score)
        } else {
            Verdict::fail(failures.join("; "), evidence.into_iter().collect()).with_score(score)
        }
    }
}

// ---------------------------------------------------------------------------
// Sequence conformance
// ---------------------------------------------------------------------------

const ACTUAL_CALLS: &str = "actual_calls";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SequenceParams {
    expected: Vec<ExpectedCall>,
    #[serde(default)]
    mode: MatchMode,
    #[serde(default)]
    check_arguments: bool,
}

/// Passes iff the actual call sequence satisfies `mode` against `expected`.
#[derive(Debug)]
pub struct SequenceGrader {
    params: SequenceParams,
    extractors: Vec<BoundExtractor>,
}

impl SequenceGrader {
    pub fn compile(rule: &Rule, registry: &ExtractorRegistry) -> Result<Self, ConfigurationError> {
        let params: SequenceParams = parse_params(rule)?;
        if let Some(blank) = params.expected.iter().position(|c| c.name.trim().is_empty()) {
            return Err(invalid(rule, format!("expected[{blank}] has an empty tool name")));
        }
        let extractors = bind_slots(
            rule,
            registry,
            &[Slot {
                name: ACTUAL_CALLS,
                kind: FactKind::Calls,
                default: Some(SEQUENCE),
            }],
        )?;
        Ok(Self { params, extractors })
    }

    fn describe_failure(&self, outcome: &MatchOutcome, actual: &[CallRecord]) -> (String, Vec<String>) {
        let expected = &self.params.expected;
        let mut parts = Vec::new();
        let mut evidence = Vec::new();

        if !outcome.missing.is_empty() {
            let names: Vec<String> = outcome
                .missing
                .iter()
                .map(|&i| format!("{}#{i}", expected[i].name))
                .collect();
            parts.push(format!("missing expected call(s): {}", names.join(", ")));
            evidence.extend(outcome.missing.iter().map(|&i| format!("missing:{}", expected[i].name)));
        }

        if self.params.mode != MatchMode::InOrderMatch && !outcome.unexpected.is_empty() {
            let names: Vec<String> = outcome
                .unexpected
                .iter()
                .map(|&i| format!("{}#{i}", actual[i].name))
                .collect();
            parts.push(format!("unexpected call(s): {}", names.join(", ")));
            evidence.extend(outcome.unexpected.iter().map(|&i| format!("unexpected:{}", actual[i].name)));
        }

        for mismatch in &outcome.argument_mismatches {
            let deltas: Vec<String> = mismatch
                .deltas
                .iter()
                .map(|d| format!("{} expected {} got {}", d.key, d.expected, d.actual))
                .collect();
            parts.push(format!(
                "argument mismatch on {}#{}: {}",
                mismatch.name,
                mismatch.expected_index,
                deltas.join(", ")
            ));
            evidence.push(format!("arguments:{}", mismatch.name));
        }

        (format!("{}: {}", self.params.mode.as_str(), parts.join("; ")), evidence)
    }
}

impl Grader for SequenceGrader {
    fn extract_facts(&self, prefix: &ThreadPrefix<'_>) -> ExtractedFactSet {
        extract_all(&self.extractors, prefix)
    }

    fn grade(&self, facts: &ExtractedFactSet, _target: Option<&ToolCall>) -> Verdict {
        let actual = facts.calls(ACTUAL_CALLS).unwrap_or(&[]);
        let expected = &self.params.expected;
        let outcome = match_sequence(self.params.mode, expected, actual, self.params.check_arguments);
        let score = outcome.score(expected.len());

        if outcome.passed {
            Verdict::pass(format!(
                "{}: {}/{} expected call(s) matched",
                self.params.mode.as_str(),
                outcome.matched(),
                expected.len()
            ))
            .with_score(score)
        } else {
            let (reason, evidence) = self.describe_failure(&outcome, actual);
            Verdict::fail(with_gaps(reason, facts), evidence).with_score(score)
        }
    }
}

// ---------------------------------------------------------------------------
// Tool-definition coverage
// ---------------------------------------------------------------------------

const DEFINED: &str = "defined_tools";
const CALLED: &str = "called_tools";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CoverageParams {
    #[serde(default)]
    ignore_tools: Vec<String>,
    #[serde(default)]
    vacuous_pass: bool,
}

/// Passes iff every called tool is declared in the thread's tool
/// definitions.
#[derive(Debug)]
pub struct CoverageGrader {
    params: CoverageParams,
    extractors: Vec<BoundExtractor>,
}

impl CoverageGrader {
    pub fn compile(rule: &Rule, registry: &ExtractorRegistry) -> Result<Self, ConfigurationError> {
        let params: CoverageParams = parse_params(rule)?;
        let extractors = bind_slots(
            rule,
            registry,
            &[
                Slot {
                    name: DEFINED,
                    kind: FactKind::Set,
                    default: Some(DEFINED_TOOLS),
                },
                Slot {
                    name: CALLED,
                    kind: FactKind::Set,
                    default: Some(CALLED_TOOLS),
                },
            ],
        )?;
        Ok(Self { params, extractors })
    }
}

impl Grader for CoverageGrader {
    fn extract_facts(&self, prefix: &ThreadPrefix<'_>) -> ExtractedFactSet {
        extract_all(&self.extractors, prefix)
    }

    fn grade(&self, facts: &ExtractedFactSet, _target: Option<&ToolCall>) -> Verdict {
        let defined = facts.set(DEFINED).cloned().unwrap_or_default();
        let called: BTreeSet<String> = facts
            .set(CALLED)
            .map(|set| {
                set.iter()
                    .filter(|name| !self.params.ignore_tools.contains(name))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if defined.is_empty() {
            return if self.params.vacuous_pass {
                Verdict::pass("no tool definitions supplied")
            } else {
                Verdict::fail("no tool definitions supplied", Vec::new())
            };
        }

        let undefined: Vec<String> = called.difference(&defined).cloned().collect();
        let score = if called.is_empty() {
            1.0
        } else {
            (called.len() - undefined.len()) as f64 / called.len() as f64
        };

        if undefined.is_empty() {
            Verdict::pass(format!("all {} called tool(s) are defined", called.len())).with_score(score)
        } else {
            Verdict::fail(
                format!("calls undefined tool(s): {}", undefined.join(", ")),
                undefined,
            )
            .with_score(score)
        }
    }
}

// ---------------------------------------------------------------------------
// Compiled rules
// ---------------------------------------------------------------------------

/// Closed set of grader variants.
#[derive(Debug)]
pub enum CompiledGrader {
    Containment(ContainmentGrader),
    Sequence(SequenceGrader),
    Coverage(CoverageGrader),
}

impl Grader for CompiledGrader {
    fn extract_facts(&self, prefix: &ThreadPrefix<'_>) -> ExtractedFactSet {
        match self {
            Self::Containment(g) => g.extract_facts(prefix),
            Self::Sequence(g) => g.extract_facts(prefix),
            Self::Coverage(g) => g.extract_facts(prefix),
        }
    }

    fn grade(&self, facts: &ExtractedFactSet, target: Option<&ToolCall>) -> Verdict {
        match self {
            Self::Containment(g) => g.grade(facts, target),
            Self::Sequence(g) => g.grade(facts, target),
            Self::Coverage(g) => g.grade(facts, target),
        }
    }

    fn evaluate(&self, thread: &Thread) -> Verdict {
        match self {
            Self::Containment(g) => g.evaluate(thread),
            Self::Sequence(g) => g.evaluate(thread),
            Self::Coverage(g) => g.evaluate(thread),
        }
    }
}

/// A rule whose grader and extractors have been resolved and validated.
#[derive(Debug)]
pub struct CompiledRule {
    pub name: String,
    pub grader_name: String,
    pub direction: DesiredDirection,
    pub grader: CompiledGrader,
}

impl CompiledRule {
    pub fn evaluate(&self, thread: &Thread) -> Verdict {
        self.grader.evaluate(thread)
    }
}

/// Resolve `rule` against `registry`.
pub fn compile_rule(rule: &Rule, registry: &ExtractorRegistry) -> Result<CompiledRule, ConfigurationError> {
    if rule.name.trim().is_empty() {
        return Err(ConfigurationError::EmptyRuleName);
    }

    let grader = match rule.grader.as_str() {
        CONTAINMENT => CompiledGrader::Containment(ContainmentGrader::compile(rule, registry)?),
        SEQUENCE_CONFORMANCE => CompiledGrader::Sequence(SequenceGrader::compile(rule, registry)?),
        TOOL_DEFINITION_COVERAGE => CompiledGrader::Coverage(CoverageGrader::compile(rule, registry)?),
        other => {
            return Err(ConfigurationError::UnknownGrader {
                rule: rule.name.clone(),
                grader: other.to_string(),
            })
        }
    };

    Ok(CompiledRule {
        name: rule.name.clone(),
        grader_name: rule.grader.clone(),
        direction: rule.direction,
        grader,
    })
}
