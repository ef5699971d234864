//! Domain-level error taxonomy for Toolgate.
//!
//! Grading failures are never errors: they are ordinary [`Verdict`]s. The
//! types here cover the two conditions that must be surfaced distinctly from
//! grading: malformed input threads and caller configuration bugs.
//!
//! [`Verdict`]: crate::domain::verdict::Verdict

/// Structural invariant violations in a recorded thread.
///
/// Fatal for the thread it was raised on: the thread is quarantined and
/// reported separately, never graded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedThreadError {
    #[error("thread input must be an array of messages or an object, got {found}")]
    InvalidShape { found: String },

    #[error("message {index}: expected an object")]
    MessageNotObject { index: usize },

    #[error("message {index}: missing role")]
    MissingRole { index: usize },

    #[error("message {index}: unknown role '{role}'")]
    UnknownRole { index: usize, role: String },

    #[error("message {index}: content must be a string or an array of blocks")]
    InvalidContent { index: usize },

    #[error("message {index}, block {block}: unknown block type '{kind}'")]
    UnknownBlockType {
        index: usize,
        block: usize,
        kind: String,
    },

    #[error("message {index}, block {block}: tool_call is missing a name")]
    MissingToolName { index: usize, block: usize },

    #[error("message {index}, block {block}: missing tool_call_id")]
    MissingToolCallId { index: usize, block: usize },

    #[error("message {index}, block {block}: duplicate tool_call_id '{tool_call_id}'")]
    DuplicateToolCallId {
        index: usize,
        block: usize,
        tool_call_id: String,
    },

    #[error(
        "message {index}, block {block}: tool_result references unknown tool_call_id '{tool_call_id}'"
    )]
    UnknownToolCallId {
        index: usize,
        block: usize,
        tool_call_id: String,
    },

    #[error("message {index}, block {block}: tool_call arguments must be an object")]
    InvalidArguments { index: usize, block: usize },

    #[error("message {index}: invalid timestamp '{value}'")]
    InvalidTimestamp { index: usize, value: String },

    #[error("invalid tool definition at {index}: {detail}")]
    InvalidToolDefinition { index: usize, detail: String },
}

/// Caller bugs detected while compiling a rule set.
///
/// Raised before any thread is processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("rule name must not be empty")]
    EmptyRuleName,

    #[error("duplicate rule name: {0}")]
    DuplicateRule(String),

    #[error("rule '{rule}': unknown grader '{grader}'")]
    UnknownGrader { rule: String, grader: String },

    #[error("rule '{rule}': unknown extractor '{extractor}'")]
    UnknownExtractor { rule: String, extractor: String },

    #[error("rule '{rule}': missing fact slot '{slot}'")]
    MissingFact { rule: String, slot: String },

    #[error("rule '{rule}': fact slot '{slot}' expects {expected} facts, extractor yields {actual}")]
    FactKindMismatch {
        rule: String,
        slot: String,
        expected: String,
        actual: String,
    },

    #[error("rule '{rule}': invalid params: {detail}")]
    InvalidParams { rule: String, detail: String },

    #[error("rule '{rule}': extractor '{extractor}' rejected params: {detail}")]
    InvalidExtractorParams {
        rule: String,
        extractor: String,
        detail: String,
    },

    #[error("invalid rule set document: {0}")]
    InvalidDocument(String),

    #[error("failed to load rule set from {path}: {detail}")]
    Load { path: String, detail: String },
}

/// Toolgate domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolgateError {
    #[error("malformed thread: {0}")]
    MalformedThread(#[from] MalformedThreadError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Toolgate domain operations.
pub type Result<T> = std::result::Result<T, ToolgateError>;
