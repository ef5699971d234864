//! Tokenizer for SQL-like query strings.
//!
//! Only as much lexical structure as reference extraction needs: words,
//! quoted identifiers (`"x"`, `` `x` ``, `[x]`), string literals, numbers
//! and single-character punctuation. Comments are skipped.

use super::QuerySyntaxError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted identifier or keyword.
    Word,
    /// Quoted identifier; `text` holds the unescaped contents.
    Quoted,
    StringLit,
    Number,
    /// Any other single character, including `.`, `,`, `(`, `)` and `;`.
    Symbol,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// Byte offset into the input.
    pub offset: usize,
}

impl Token {
    pub fn is_symbol(&self, c: char) -> bool {
        self.kind == TokenKind::Symbol && self.text.len() == c.len_utf8() && self.text.starts_with(c)
    }

    pub fn is_word(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Split `input` into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>, QuerySyntaxError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|&(_, n)| n);

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // -- line comment
        if c == '-' && next == Some('-') {
            while i < chars.len() && chars[i].1 != '\n' {
                i += 1;
            }
            continue;
        }

        // /* block comment */
        if c == '/' && next == Some('*') {
            i += 2;
            loop {
                match (chars.get(i), chars.get(i + 1)) {
                    (Some(&(_, '*')), Some(&(_, '/'))) => {
                        i += 2;
                        break;
                    }
                    (Some(_), _) => i += 1,
                    (None, _) => {
                        return Err(QuerySyntaxError::new(offset, "unterminated block comment"))
                    }
                }
            }
            continue;
        }

        match c {
            '\'' => {
                let (text, end) = read_delimited(&chars, i, '\'', "unterminated string literal")?;
                tokens.push(Token {
                    kind: TokenKind::StringLit,
                    text,
                    offset,
                });
                i = end;
            }
            '"' | '`' => {
                let (text, end) = read_delimited(&chars, i, c, "unterminated quoted identifier")?;
                if text.is_empty() {
                    return Err(QuerySyntaxError::new(offset, "empty quoted identifier"));
                }
                tokens.push(Token {
                    kind: TokenKind::Quoted,
                    text,
                    offset,
                });
                i = end;
            }
            '[' => {
                let (text, end) = read_delimited(&chars, i, ']', "unterminated quoted identifier")?;
                if text.is_empty() {
                    return Err(QuerySyntaxError::new(offset, "empty quoted identifier"));
                }
                tokens.push(Token {
                    kind: TokenKind::Quoted,
                    text,
                    offset,
                });
                i = end;
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_continue(chars[i].1) {
                    i += 1;
                }
                tokens.push(Token {
                    kind: TokenKind::Word,
                    text: chars[start..i].iter().map(|&(_, ch)| ch).collect(),
                    offset,
                });
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() {
                    let ch = chars[i].1;
                    let decimal_point = ch == '.'
                        && chars.get(i + 1).map(|&(_, n)| n.is_ascii_digit()).unwrap_or(false);
                    if ch.is_ascii_alphanumeric() || ch == '_' || decimal_point {
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: TokenKind::Number,
                    text: chars[start..i].iter().map(|&(_, ch)| ch).collect(),
                    offset,
                });
            }
            other => {
                tokens.push(Token {
                    kind: TokenKind::Symbol,
                    text: other.to_string(),
                    offset,
                });
                i += 1;
            }
        }
    }

    Ok(tokens)
}

/// Read a quoted run starting at `chars[start]`. A doubled closing
/// character inside the run is an escaped literal.
fn read_delimited(
    chars: &[(usize, char)],
    start: usize,
    close: char,
    unterminated: &str,
) -> Result<(String, usize), QuerySyntaxError> {
    let offset = chars[start].0;
    let mut text = String::new();
    let mut i = start + 1;

    loop {
        match chars.get(i) {
            None => return Err(QuerySyntaxError::new(offset, unterminated)),
            Some(&(_, ch)) if ch == close => {
                if chars.get(i + 1).map(|&(_, n)| n) == Some(close) {
                    text.push(close);
                    i += 2;
                } else {
                    return Ok((text, i + 1));
                }
            }
            Some(&(_, ch)) => {
                text.push(ch);
                i += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .expect("tokenize")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_words_symbols_and_numbers() {
        let tokens = tokenize("SELECT a.b, 1.5 FROM t;").expect("tokenize");
        let texts: Vec<_> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["SELECT", "a", ".", "b", ",", "1.5", "FROM", "t", ";"]);
        assert!(tokens[0].is_word("select"));
        assert!(tokens[2].is_symbol('.'));
    }

    #[test]
    fn test_comments_are_skipped() {
        let tokens = tokenize("SELECT -- trailing FROM x\n 1 /* FROM y */").expect("tokenize");
        assert_eq!(tokens.len(), 2);
    }

    #[test]
    fn test_quoted_identifier_styles() {
        assert_eq!(
            kinds(r#""Orders" `Sales` [Dbo]"#),
            vec![TokenKind::Quoted, TokenKind::Quoted, TokenKind::Quoted]
        );
        let tokens = tokenize(r#""we""ird""#).expect("tokenize");
        assert_eq!(tokens[0].text, r#"we"ird"#);
    }

    #[test]
    fn test_string_literal_escape() {
        let tokens = tokenize("'it''s FROM'").expect("tokenize");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::StringLit);
        assert_eq!(tokens[0].text, "it's FROM");
    }

    #[test]
    fn test_unterminated_forms_fail() {
        assert!(tokenize("SELECT 'open").is_err());
        assert!(tokenize("SELECT \"open").is_err());
        assert!(tokenize("SELECT 1 /* open").is_err());
        assert!(tokenize("SELECT [open").is_err());
    }

    #[test]
    fn test_error_offset_points_at_opening_quote() {
        let err = tokenize("SELECT 'x").unwrap_err();
        assert_eq!(err.offset, 7);
    }
}
