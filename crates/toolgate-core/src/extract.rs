//! Extractor registry: pure functions that derive named facts from a
//! thread prefix.
//!
//! An [`Extractor`] is registered under a name and bound once per rule with
//! that rule's parameters, yielding a [`FactFn`]. Bound functions are
//! deterministic and side-effect free; they are shared read-only across
//! worker threads.
//!
//! Missing data is never an error. An extractor that finds nothing returns
//! an empty value plus a gap note explaining what was absent.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::error::ConfigurationError;
use crate::domain::rule::ExtractorSpec;
use crate::domain::thread::ThreadPrefix;
use crate::query::normalize_identifier;

// ---------------------------------------------------------------------------
// Fact values
// ---------------------------------------------------------------------------

/// Shape of the value an extractor produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactKind {
    Set,
    Calls,
}

impl fmt::Display for FactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set => f.write_str("set"),
            Self::Calls => f.write_str("calls"),
        }
    }
}

/// A tool call as seen by sequence matching: name plus resolved arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl CallRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Map::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = arguments;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactValue {
    Set(BTreeSet<String>),
    Calls(Vec<CallRecord>),
}

impl FactValue {
    pub fn kind(&self) -> FactKind {
        match self {
            Self::Set(_) => FactKind::Set,
            Self::Calls(_) => FactKind::Calls,
        }
    }
}

/// One extractor's output: the value plus notes on anything it could not
/// find.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub value: FactValue,
    pub gaps: Vec<String>,
}

impl Extraction {
    pub fn set(values: BTreeSet<String>) -> Self {
        Self {
            value: FactValue::Set(values),
            gaps: Vec::new(),
        }
    }

    pub fn calls(calls: Vec<CallRecord>) -> Self {
        Self {
            value: FactValue::Calls(calls),
            gaps: Vec::new(),
        }
    }

    pub fn with_gap(mut self, gap: impl Into<String>) -> Self {
        self.gaps.push(gap.into());
        self
    }
}

/// Facts extracted for one grading invocation, keyed by slot name.
///
/// Built fresh for every prefix that is graded and dropped afterwards.
#[derive(Debug, Clone, Default)]
pub struct ExtractedFactSet {
    facts: BTreeMap<String, Extraction>,
}

impl ExtractedFactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: impl Into<String>, extraction: Extraction) {
        self.facts.insert(slot.into(), extraction);
    }

    pub fn get(&self, slot: &str) -> Option<&Extraction> {
        self.facts.get(slot)
    }

    pub fn set(&self, slot: &str) -> Option<&BTreeSet<String>> {
        match &self.facts.get(slot)?.value {
            FactValue::Set(values) => Some(values),
            FactValue::Calls(_) => None,
        }
    }

    pub fn calls(&self, slot: &str) -> Option<&[CallRecord]> {
        match &self.facts.get(slot)?.value {
            FactValue::Calls(calls) => Some(calls),
            FactValue::Set(_) => None,
        }
    }

    /// Gap notes of every slot, prefixed with the slot name.
    pub fn gaps(&self) -> Vec<String> {
        self.facts
            .iter()
            .flat_map(|(slot, e)| e.gaps.iter().map(move |g| format!("{slot}: {g}")))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Extractor protocol and registry
// ---------------------------------------------------------------------------

/// A bound extractor function.
pub type FactFn = Arc<dyn Fn(&ThreadPrefix<'_>) -> Extraction + Send + Sync>;

/// A named fact source. `bind` validates parameters once, at rule
/// compilation, and returns the function run per prefix.
pub trait Extractor: Send + Sync {
    fn output_kind(&self) -> FactKind;

    fn bind(&self, params: &Value) -> Result<FactFn, String>;
}

/// Adapter registering a plain closure as a parameterless extractor.
pub struct FnExtractor {
    kind: FactKind,
    fact: FactFn,
}

impl FnExtractor {
    pub fn new<F>(kind: FactKind, f: F) -> Self
    where
        F: Fn(&ThreadPrefix<'_>) -> Extraction + Send + Sync + 'static,
    {
        Self {
            kind,
            fact: Arc::new(f),
        }
    }
}

impl Extractor for FnExtractor {
    fn output_kind(&self) -> FactKind {
        self.kind
    }

    fn bind(&self, params: &Value) -> Result<FactFn, String> {
        let _: NoParams = parse_params(params)?;
        Ok(Arc::clone(&self.fact))
    }
}

/// An extractor bound to one rule slot.
#[derive(Clone)]
pub struct BoundExtractor {
    pub slot: String,
    pub extractor: String,
    pub kind: FactKind,
    fact: FactFn,
}

impl BoundExtractor {
    pub fn extract(&self, prefix: &ThreadPrefix<'_>) -> Extraction {
        (self.fact)(prefix)
    }
}

impl fmt::Debug for BoundExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundExtractor")
            .field("slot", &self.slot)
            .field("extractor", &self.extractor)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Name → extractor lookup, built once and shared read-only.
#[derive(Clone)]
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// A registry with no extractors at all.
    pub fn empty() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// A registry holding the built-in extractors.
    pub fn with_builtins() -> Self {
        Self::empty()
            .with_extractor(PROVENANCE, ProvenanceExtractor)
            .with_extractor(SEQUENCE, SequenceExtractor)
            .with_extractor(DEFINED_TOOLS, DefinedToolsExtractor)
            .with_extractor(CALLED_TOOLS, CalledToolsExtractor)
    }

    pub fn with_extractor(mut self, name: impl Into<String>, extractor: impl Extractor + 'static) -> Self {
        self.register(name, extractor);
        self
    }

    /// Register (or replace) an extractor under `name`.
    pub fn register(&mut self, name: impl Into<String>, extractor: impl Extractor + 'static) {
        self.extractors.insert(name.into(), Arc::new(extractor));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.extractors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.extractors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve and bind `spec` for `slot` of `rule`.
    pub fn bind(
        &self,
        rule: &str,
        slot: &str,
        spec: &ExtractorSpec,
    ) -> Result<BoundExtractor, ConfigurationError> {
        let extractor = self.extractors.get(&spec.name).ok_or_else(|| {
            ConfigurationError::UnknownExtractor {
                rule: rule.to_string(),
                extractor: spec.name.clone(),
            }
        })?;
        let fact = extractor
            .bind(&spec.params)
            .map_err(|detail| ConfigurationError::InvalidExtractorParams {
                rule: rule.to_string(),
                extractor: spec.name.clone(),
                detail,
            })?;
        Ok(BoundExtractor {
            slot: slot.to_string(),
            extractor: spec.name.clone(),
            kind: extractor.output_kind(),
            fact,
        })
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("extractors", &self.names())
            .finish()
    }
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: &Value) -> Result<T, String> {
    let params = match params {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(params).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Payload paths
// ---------------------------------------------------------------------------

/// Collect string leaves of `value` under a dot-separated `path`.
///
/// Arrays met along the way are flattened. Returns whether the path
/// resolved anywhere, so callers can tell "absent" from "empty".
pub fn collect_strings(value: &Value, path: &str, out: &mut Vec<String>) -> bool {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    collect_at(value, &segments, out)
}

fn collect_at(value: &Value, segments: &[&str], out: &mut Vec<String>) -> bool {
    match (segments.split_first(), value) {
        (_, Value::Array(items)) => {
            let mut found = false;
            for item in items {
                found |= collect_at(item, segments, out);
            }
            found || segments.is_empty()
        }
        (None, Value::String(s)) => {
            out.push(s.clone());
            true
        }
        (None, _) => true,
        (Some((head, rest)), Value::Object(map)) => match map.get(*head) {
            Some(next) => collect_at(next, rest, out),
            None => false,
        },
        (Some(_), _) => false,
    }
}

/// Tool results are sometimes recorded as JSON text; decode those.
fn decoded_payload(payload: &Value) -> std::borrow::Cow<'_, Value> {
    if let Value::String(text) = payload {
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') {
            if let Ok(decoded) = serde_json::from_str::<Value>(text) {
                return std::borrow::Cow::Owned(decoded);
            }
        }
    }
    std::borrow::Cow::Borrowed(payload)
}

// ---------------------------------------------------------------------------
// Built-in: provenance
// ---------------------------------------------------------------------------

pub const PROVENANCE: &str = "provenance";
pub const SEQUENCE: &str = "sequence";
pub const DEFINED_TOOLS: &str = "defined_tools";
pub const CALLED_TOOLS: &str = "called_tools";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProvenanceParams {
    tools: Vec<String>,
    #[serde(default)]
    path: String,
    #[serde(default = "default_true")]
    canonicalize: bool,
}

fn default_true() -> bool {
    true
}

/// Unions identifiers found in the results of allow-listed tools.
///
/// Params: `tools` (required), `path` (dot-separated, default: payload
/// root), `canonicalize` (default `true`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvenanceExtractor;

impl Extractor for ProvenanceExtractor {
    fn output_kind(&self) -> FactKind {
        FactKind::Set
    }

    fn bind(&self, params: &Value) -> Result<FactFn, String> {
        let params: ProvenanceParams = parse_params(params)?;
        if params.tools.is_empty() {
            return Err("tools must list at least one tool name".to_string());
        }
        let params = Arc::new(params);

        let fact: FactFn = Arc::new(move |prefix: &ThreadPrefix<'_>| {
            let mut raw = Vec::new();
            let mut matched = 0usize;
            let mut resolved = 0usize;

            for result in prefix.tool_results() {
                if !params.tools.iter().any(|t| t == result.tool_name) {
                    continue;
                }
                matched += 1;
                let payload = decoded_payload(&result.result.payload);
                if collect_strings(&payload, &params.path, &mut raw) {
                    resolved += 1;
                }
            }

            let values: BTreeSet<String> = raw
                .iter()
                .map(|s| {
                    if params.canonicalize {
                        normalize_identifier(s)
                    } else {
                        s.clone()
                    }
                })
                .filter(|s| !s.is_empty())
                .collect();

            let mut extraction = Extraction::set(values);
            if matched == 0 {
                extraction = extraction.with_gap(format!(
                    "no result from [{}] before this point",
                    params.tools.join(", ")
                ));
            } else if resolved == 0 {
                extraction = extraction.with_gap(format!(
                    "path '{}' not found in {} result(s) from [{}]",
                    params.path,
                    matched,
                    params.tools.join(", ")
                ));
            }
            extraction
        });
        Ok(fact)
    }
}

// ---------------------------------------------------------------------------
// Built-in: sequence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
struct CallRange {
    #[serde(default)]
    start: usize,
    #[serde(default)]
    end: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SequenceParams {
    #[serde(default)]
    exclude_tools: Vec<String>,
    #[serde(default)]
    range: Option<CallRange>,
}

/// Ordered tool calls with their arguments.
///
/// Params: `exclude_tools` (dropped before anything else), `range`
/// (`{start, end}`, a half-open window over the remaining calls).
#[derive(Debug, Clone, Copy, Default)]
pub struct SequenceExtractor;

impl Extractor for SequenceExtractor {
    fn output_kind(&self) -> FactKind {
        FactKind::Calls
    }

    fn bind(&self, params: &Value) -> Result<FactFn, String> {
        let params: SequenceParams = parse_params(params)?;
        if let Some(CallRange { start, end: Some(end) }) = params.range {
            if start > end {
                return Err(format!("range start {start} is past end {end}"));
            }
        }
        let params = Arc::new(params);

        let fact: FactFn = Arc::new(move |prefix: &ThreadPrefix<'_>| {
            let calls: Vec<CallRecord> = prefix
                .tool_calls()
                .filter(|r| !params.exclude_tools.iter().any(|t| *t == r.call.name))
                .map(|r| CallRecord::new(r.call.name.clone()).with_arguments(r.call.arguments.clone()))
                .collect();

            let calls = match params.range {
                Some(range) => {
                    let end = range.end.unwrap_or(calls.len()).min(calls.len());
                    let start = range.start.min(end);
                    calls[start..end].to_vec()
                }
                None => calls,
            };

            if calls.is_empty() {
                Extraction::calls(calls).with_gap("no tool calls found")
            } else {
                Extraction::calls(calls)
            }
        });
        Ok(fact)
    }
}

// ---------------------------------------------------------------------------
// Built-ins: tool names
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoParams {}

/// Names of the tools declared in the thread's `tool_definitions`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefinedToolsExtractor;

impl Extractor for DefinedToolsExtractor {
    fn output_kind(&self) -> FactKind {
        FactKind::Set
    }

    fn bind(&self, params: &Value) -> Result<FactFn, String> {
        let _: NoParams = parse_params(params)?;
        let fact: FactFn = Arc::new(|prefix: &ThreadPrefix<'_>| {
            let names: BTreeSet<String> = prefix
                .thread()
                .tool_definitions()
                .iter()
                .map(|d| d.name.clone())
                .collect();
            if names.is_empty() {
                Extraction::set(names).with_gap("no tool definitions supplied")
            } else {
                Extraction::set(names)
            }
        });
        Ok(fact)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CalledToolsParams {
    #[serde(default)]
    exclude_tools: Vec<String>,
}

/// Distinct names of the tools called in the prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct CalledToolsExtractor;

impl Extractor for CalledToolsExtractor {
    fn output_kind(&self) -> FactKind {
        FactKind::Set
    }

    fn bind(&self, params: &Value) -> Result<FactFn, String> {
        let params: CalledToolsParams = parse_params(params)?;
        let fact: FactFn = Arc::new(move |prefix: &ThreadPrefix<'_>| {
            Extraction::set(
                prefix
                    .tool_calls()
                    .map(|r| r.call.name.clone())
                    .filter(|name| !params.exclude_tools.contains(name))
                    .collect(),
            )
        });
        Ok(fact)
    }
}
