//! Table-reference extraction for SQL-like query strings.
//!
//! The query is never executed and never fully parsed. A scan over the
//! token stream tracks parenthesis frames and the clause that introduced a
//! table position (`FROM`, `JOIN`, `INTO`, `UPDATE`, `USING`, `TABLE`), and
//! collects the qualified names found there. Common table expression names
//! are collected first and excluded from the result.

use std::collections::BTreeSet;

use super::lexer::{tokenize, Token, TokenKind};
use super::QuerySyntaxError;

const RESERVED: &[&str] = &[
    "ALL", "ALTER", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CREATE", "CROSS",
    "DELETE", "DESC", "DISTINCT", "DO", "DROP", "ELSE", "END", "EXCEPT", "EXISTS", "FALSE",
    "FETCH", "FOR", "FROM", "FULL", "GROUP", "HAVING", "IF", "ILIKE", "IN", "INNER", "INSERT",
    "INTERSECT", "INTO", "IS", "JOIN", "LATERAL", "LEFT", "LIKE", "LIMIT", "MERGE", "NATURAL",
    "NOT", "NULL", "OFFSET", "ON", "ONLY", "OR", "ORDER", "OUTER", "OVER", "PARTITION",
    "QUALIFY", "RECURSIVE", "RETURNING", "RIGHT", "SELECT", "SET", "SOME", "TABLE", "THEN",
    "TRUE", "TRUNCATE", "UNION", "UPDATE", "USING", "VALUES", "WHEN", "WHERE", "WINDOW", "WITH",
];

const STATEMENT_START: &[&str] = &[
    "ALTER", "CREATE", "DELETE", "DESCRIBE", "DROP", "EXPLAIN", "INSERT", "MERGE", "REPLACE",
    "SELECT", "SHOW", "TABLE", "TRUNCATE", "UPDATE", "VALUES", "WITH",
];

/// Keywords that close a comma-separated `FROM` list.
const CLAUSE_END: &[&str] = &[
    "EXCEPT", "FETCH", "FOR", "GROUP", "HAVING", "INTERSECT", "LIMIT", "OFFSET", "ORDER",
    "QUALIFY", "RETURNING", "SELECT", "SET", "UNION", "VALUES", "WHERE", "WINDOW",
];

/// Words after which `UPDATE` is a clause, not a statement
/// (`FOR UPDATE`, `ON CONFLICT DO UPDATE`, `ON DUPLICATE KEY UPDATE`).
const UPDATE_CLAUSE_LEADS: &[&str] = &["DO", "FOR", "KEY"];

/// Words allowed between a table keyword and the table name.
const TABLE_MODIFIERS: &[&str] = &["EXISTS", "IF", "LATERAL", "NOT", "ONLY"];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn is_one_of(token: &Token, words: &[&str]) -> bool {
    token.kind == TokenKind::Word && words.iter().any(|k| token.text.eq_ignore_ascii_case(k))
}

fn symbol_at(tokens: &[Token], i: usize, c: char) -> bool {
    tokens.get(i).map(|t| t.is_symbol(c)).unwrap_or(false)
}

fn word_at(tokens: &[Token], i: usize, keyword: &str) -> bool {
    tokens.get(i).map(|t| t.is_word(keyword)).unwrap_or(false)
}

/// One identifier part, lowercased. Reserved words only count when quoted,
/// unless `allow_reserved` is set (trailing parts of a dotted name).
fn name_part(token: &Token, allow_reserved: bool) -> Option<String> {
    match token.kind {
        TokenKind::Word if allow_reserved || !is_reserved(&token.text) => {
            Some(token.text.to_lowercase())
        }
        TokenKind::Quoted => Some(token.text.to_lowercase()),
        _ => None,
    }
}

/// Parse `a.b.c` at `start`. Returns the canonical name and the index just
/// past it.
fn qualified_name(tokens: &[Token], start: usize, allow_reserved: bool) -> Option<(String, usize)> {
    let mut parts = vec![name_part(tokens.get(start)?, allow_reserved)?];
    let mut i = start + 1;
    while symbol_at(tokens, i, '.') {
        match tokens.get(i + 1).and_then(|t| name_part(t, true)) {
            Some(part) => {
                parts.push(part);
                i += 2;
            }
            None => break,
        }
    }
    Some((parts.join("."), i))
}

/// Canonical form of a possibly quoted, possibly qualified identifier:
/// quotes stripped, lowercased, parts joined with `.`.
///
/// Text that does not lex as a dotted name is trimmed and lowercased.
pub fn normalize_identifier(raw: &str) -> String {
    if let Ok(tokens) = tokenize(raw) {
        if let Some((name, end)) = qualified_name(&tokens, 0, true) {
            if end == tokens.len() {
                return name;
            }
        }
    }
    raw.trim().to_lowercase()
}

/// Render a canonical name back as query text, quoting parts that would
/// not survive re-lexing as plain words.
pub fn render_identifier(canonical: &str) -> String {
    canonical
        .split('.')
        .map(|part| {
            let mut chars = part.chars();
            let plain = match chars.next() {
                Some(first) if first.is_ascii_lowercase() || first == '_' => chars
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '$'),
                _ => false,
            };
            if plain && !is_reserved(part) {
                part.to_string()
            } else {
                format!("\"{}\"", part.replace('"', "\"\""))
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Keyword that opened a pending table position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    From,
    Join,
    Into,
    Update,
    Using,
    Table,
}

impl Pending {
    fn requires_table(self) -> bool {
        matches!(self, Self::From | Self::Join)
    }

    fn keyword(self) -> &'static str {
        match self {
            Self::From => "FROM",
            Self::Join => "JOIN",
            Self::Into => "INTO",
            Self::Update => "UPDATE",
            Self::Using => "USING",
            Self::Table => "TABLE",
        }
    }
}

#[derive(Debug)]
struct Frame {
    /// False inside function-call parentheses, where `FROM` is an argument
    /// keyword (`EXTRACT(YEAR FROM d)`), until a subquery starts.
    queries: bool,
    pending: Option<Pending>,
    from_list: bool,
    open_offset: usize,
}

impl Frame {
    fn new(queries: bool, open_offset: usize) -> Self {
        Self {
            queries,
            pending: None,
            from_list: false,
            open_offset,
        }
    }
}

fn missing_table(pending: Pending, offset: usize) -> QuerySyntaxError {
    QuerySyntaxError::new(offset, format!("expected table name after {}", pending.keyword()))
}

/// Index just past the parenthesis group opening at `open`.
fn skip_group(tokens: &[Token], open: usize) -> Result<usize, QuerySyntaxError> {
    let mut depth = 0usize;
    for (k, token) in tokens.iter().enumerate().skip(open) {
        if token.is_symbol('(') {
            depth += 1;
        } else if token.is_symbol(')') {
            depth = depth.saturating_sub(1);
            if depth == 0 {
                return Ok(k + 1);
            }
        }
    }
    Err(QuerySyntaxError::new(tokens[open].offset, "unbalanced parentheses"))
}

fn collect_cte_names(tokens: &[Token], end_offset: usize) -> Result<BTreeSet<String>, QuerySyntaxError> {
    let offset_at = |j: usize| tokens.get(j).map(|t| t.offset).unwrap_or(end_offset);
    let mut names = BTreeSet::new();

    for (i, token) in tokens.iter().enumerate() {
        if !token.is_word("WITH") {
            continue;
        }
        // Only a statement or subquery start opens a CTE list.
        if i > 0 && !symbol_at(tokens, i - 1, '(') && !symbol_at(tokens, i - 1, ';') {
            continue;
        }

        let mut j = i + 1;
        if word_at(tokens, j, "RECURSIVE") {
            j += 1;
        }
        loop {
            let name = tokens
                .get(j)
                .and_then(|t| name_part(t, false))
                .ok_or_else(|| QuerySyntaxError::new(offset_at(j), "expected common table expression name"))?;
            names.insert(name);
            j += 1;

            if symbol_at(tokens, j, '(') {
                j = skip_group(tokens, j)?;
            }
            if !word_at(tokens, j, "AS") {
                return Err(QuerySyntaxError::new(
                    offset_at(j),
                    "expected AS in common table expression",
                ));
            }
            j += 1;
            while word_at(tokens, j, "NOT") || word_at(tokens, j, "MATERIALIZED") {
                j += 1;
            }
            if !symbol_at(tokens, j, '(') {
                return Err(QuerySyntaxError::new(
                    offset_at(j),
                    "expected ( after AS in common table expression",
                ));
            }
            j = skip_group(tokens, j)?;

            if symbol_at(tokens, j, ',') {
                j += 1;
            } else {
                break;
            }
        }
    }

    Ok(names)
}

/// Canonical names of every table the query references.
pub fn referenced_tables(query: &str) -> Result<BTreeSet<String>, QuerySyntaxError> {
    let tokens = tokenize(query)?;
    if tokens.is_empty() {
        return Err(QuerySyntaxError::new(0, "empty query"));
    }
    let end_offset = query.len();
    let ctes = collect_cte_names(&tokens, end_offset)?;

    let mut refs = BTreeSet::new();
    let mut frames = vec![Frame::new(true, 0)];
    let mut statement_start = true;
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];

        if statement_start {
            if token.is_symbol(';') {
                i += 1;
                continue;
            }
            if !token.is_symbol('(') && !is_one_of(token, STATEMENT_START) {
                return Err(QuerySyntaxError::new(
                    token.offset,
                    format!("expected a statement, found '{}'", token.text),
                ));
            }
            statement_start = false;
        }

        if token.is_symbol(';') {
            if let Some(open) = frames.get(1) {
                return Err(QuerySyntaxError::new(open.open_offset, "unbalanced parentheses"));
            }
            if let Some(pending) = frames[0].pending.filter(|p| p.requires_table()) {
                return Err(missing_table(pending, token.offset));
            }
            frames[0] = Frame::new(true, 0);
            statement_start = true;
            i += 1;
            continue;
        }

        if token.is_symbol('(') {
            let prev_is_name = i
                .checked_sub(1)
                .map(|p| {
                    let prev = &tokens[p];
                    prev.kind == TokenKind::Quoted
                        || (prev.kind == TokenKind::Word && !is_reserved(&prev.text))
                })
                .unwrap_or(false);
            let top = frames.last_mut().map(|f| f.pending.take());
            let derived = matches!(top, Some(Some(_)));
            frames.push(Frame::new(derived || !prev_is_name, token.offset));
            i += 1;
            continue;
        }

        if token.is_symbol(')') {
            if frames.len() == 1 {
                return Err(QuerySyntaxError::new(token.offset, "unbalanced parentheses"));
            }
            if let Some(pending) = frames
                .pop()
                .and_then(|f| f.pending)
                .filter(|p| p.requires_table())
            {
                return Err(missing_table(pending, token.offset));
            }
            i += 1;
            continue;
        }

        let prev_is_open = i > 0 && symbol_at(&tokens, i - 1, '(');
        let Some(frame) = frames.last_mut() else {
            break;
        };

        if token.is_symbol(',') {
            if frame.pending.is_none() && frame.from_list {
                frame.pending = Some(Pending::From);
            }
            i += 1;
            continue;
        }

        if let Some(pending) = frame.pending {
            if is_one_of(token, TABLE_MODIFIERS) {
                i += 1;
                continue;
            }
            if let Some((name, next)) = qualified_name(&tokens, i, false) {
                frame.pending = None;
                let table_function = matches!(pending, Pending::From | Pending::Join | Pending::Using)
                    && symbol_at(&tokens, next, '(');
                if !table_function {
                    refs.insert(name);
                }
                i = next;
                continue;
            }
            if pending.requires_table() {
                return Err(missing_table(pending, token.offset));
            }
            frame.pending = None;
        }

        if token.kind != TokenKind::Word {
            i += 1;
            continue;
        }

        if !frame.queries {
            if prev_is_open && (token.is_word("SELECT") || token.is_word("WITH")) {
                frame.queries = true;
            } else {
                i += 1;
                continue;
            }
        }

        if token.is_word("FROM") {
            let distinct_from = i >= 2
                && word_at(&tokens, i - 1, "DISTINCT")
                && (word_at(&tokens, i - 2, "IS") || word_at(&tokens, i - 2, "NOT"));
            if !distinct_from {
                frame.pending = Some(Pending::From);
                frame.from_list = true;
            }
        } else if token.is_word("JOIN") {
            frame.pending = Some(Pending::Join);
            frame.from_list = true;
        } else if token.is_word("INTO") {
            frame.pending = Some(Pending::Into);
            frame.from_list = false;
        } else if token.is_word("UPDATE") {
            let clause = i > 0 && is_one_of(&tokens[i - 1], UPDATE_CLAUSE_LEADS);
            if clause {
                frame.from_list = false;
            } else {
                frame.pending = Some(Pending::Update);
                frame.from_list = true;
            }
        } else if token.is_word("USING") {
            if !symbol_at(&tokens, i + 1, '(') {
                frame.pending = Some(Pending::Using);
                frame.from_list = true;
            }
        } else if token.is_word("TABLE") {
            frame.pending = Some(Pending::Table);
            frame.from_list = false;
        } else if is_one_of(token, CLAUSE_END) {
            frame.from_list = false;
        }

        i += 1;
    }

    if let Some(open) = frames.get(1) {
        return Err(QuerySyntaxError::new(open.open_offset, "unbalanced parentheses"));
    }
    if let Some(pending) = frames[0].pending.filter(|p| p.requires_table()) {
        return Err(missing_table(pending, end_offset));
    }

    refs.retain(|name| !ctes.contains(name));
    Ok(refs)
}
