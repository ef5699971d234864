//! Query parsing: turn a tool call's query argument into the set of
//! identifiers it references, without executing it.

pub mod lexer;
pub mod sql;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

pub use sql::{normalize_identifier, referenced_tables, render_identifier};

/// A query argument could not be parsed into a reference set.
///
/// Never raised to the caller of the engine: graders turn it into a
/// failing verdict carrying this text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("query syntax error at offset {offset}: {message}")]
pub struct QuerySyntaxError {
    pub offset: usize,
    pub message: String,
}

impl QuerySyntaxError {
    pub fn new(offset: usize, message: impl Into<String>) -> Self {
        Self {
            offset,
            message: message.into(),
        }
    }
}

/// Query sub-languages the parser understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryLanguage {
    #[default]
    Sql,
}

/// Canonical identifiers referenced by `text` in `language`.
pub fn referenced_identifiers(
    language: QueryLanguage,
    text: &str,
) -> Result<BTreeSet<String>, QuerySyntaxError> {
    match language {
        QueryLanguage::Sql => referenced_tables(text),
    }
}
