//! Domain models for Toolgate.
//!
//! Canonical definitions for the core entities:
//! - `Thread`: one recorded agent interaction
//! - `Rule` / `RuleSet`: declarative grading configuration
//! - `Verdict` / `ItemResult`: grading outcomes
//! - error taxonomy separating malformed input from configuration bugs

pub mod canonical;
pub mod error;
pub mod rule;
pub mod thread;
pub mod verdict;

pub use error::{ConfigurationError, MalformedThreadError, Result, ToolgateError};
pub use rule::{ComparisonConfig, DesiredDirection, ExtractorSpec, MatchMode, Rule, RuleSet};
pub use thread::{
    ContentBlock, Message, Role, Thread, ThreadPrefix, ToolCall, ToolCallRef, ToolDefinition,
    ToolResult, ToolResultRef,
};
pub use verdict::{ItemResult, QuarantinedItem, Verdict};
