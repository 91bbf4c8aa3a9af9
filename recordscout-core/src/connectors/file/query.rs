//! Query sublanguage for file sources.
//!
//! ```text
//! query   := SELECT columns FROM ident [WHERE ident LIKE string] [LIMIT integer] [';']
//! columns := '*' | ident (',' ident)*
//! ident   := word | '"' any text, '""' for a quote '"'
//! string  := '\'' any text, '\'\'' for a quote '\''
//! ```
//!
//! Keywords are case-insensitive. `LIKE` understands `%` and `_` and ignores
//! case. Anything outside the grammar is rejected.

use crate::Result;
use crate::error::RecordScoutError;
use crate::models::{Row, TableResult, scalar_text};
use serde_json::Value as JsonValue;

/// Parsed `SELECT` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    pub projection: Projection,
    pub table: String,
    pub filter: Option<LikeFilter>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
}

/// `WHERE <column> LIKE '<pattern>'`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikeFilter {
    pub column: String,
    pub pattern: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    QuotedIdent(String),
    Str(String),
    Integer(u64),
    Star,
    Comma,
    Semicolon,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Word(w) => format!("'{}'", w),
            Self::QuotedIdent(w) => format!("\"{}\"", w),
            Self::Str(s) => format!("string '{}'", s),
            Self::Integer(n) => n.to_string(),
            Self::Star => "'*'".to_string(),
            Self::Comma => "','".to_string(),
            Self::Semicolon => "';'".to_string(),
        }
    }
}

const KEYWORDS: [&str; 5] = ["select", "from", "where", "like", "limit"];

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semicolon);
            }
            '\'' | '"' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    if c == ch {
                        if chars.peek().is_some_and(|&(_, next)| next == ch) {
                            chars.next();
                            text.push(ch);
                        } else {
                            closed = true;
                            break;
                        }
                    } else {
                        text.push(c);
                    }
                }
                if !closed {
                    return Err(RecordScoutError::query_failed(format!(
                        "unterminated quote starting at position {}",
                        start
                    )));
                }
                tokens.push(if ch == '\'' {
                    Token::Str(text)
                } else {
                    Token::QuotedIdent(text)
                });
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    chars.next();
                }
                let value = digits.parse::<u64>().map_err(|_| {
                    RecordScoutError::query_failed(format!("number '{}' is too large", digits))
                })?;
                tokens.push(Token::Integer(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&(_, w)) = chars.peek() {
                    if !(w.is_alphanumeric() || w == '_' || w == '.') {
                        break;
                    }
                    word.push(w);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
            other => {
                return Err(RecordScoutError::query_failed(format!(
                    "unexpected character '{}' at position {}",
                    other, start
                )));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.at_keyword(keyword) {
            self.pos += 1;
            return Ok(());
        }
        Err(self.unexpected(&keyword.to_uppercase()))
    }

    fn ident(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Word(w)) if !KEYWORDS.contains(&w.to_lowercase().as_str()) => {
                let w = w.clone();
                self.pos += 1;
                Ok(w)
            }
            Some(Token::QuotedIdent(w)) => {
                let w = w.clone();
                self.pos += 1;
                Ok(w)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn unexpected(&self, wanted: &str) -> RecordScoutError {
        match self.peek() {
            Some(token) => RecordScoutError::query_failed(format!(
                "expected {} but found {}",
                wanted,
                token.describe()
            )),
            None => RecordScoutError::query_failed(format!(
                "expected {} but the query ended",
                wanted
            )),
        }
    }

    fn select(&mut self) -> Result<SelectQuery> {
        self.expect_keyword("select")?;
        let projection = self.projection()?;
        self.expect_keyword("from")?;
        let table = self.ident()?;

        let filter = if self.at_keyword("where") {
            self.pos += 1;
            let column = self.ident()?;
            self.expect_keyword("like")?;
            match self.next() {
                Some(Token::Str(pattern)) => Some(LikeFilter { column, pattern }),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected("a quoted string"));
                }
            }
        } else {
            None
        };

        let limit = if self.at_keyword("limit") {
            self.pos += 1;
            match self.next() {
                Some(Token::Integer(n)) => Some(usize::try_from(n).unwrap_or(usize::MAX)),
                _ => {
                    self.pos -= 1;
                    return Err(self.unexpected("an integer"));
                }
            }
        } else {
            None
        };

        if matches!(self.peek(), Some(Token::Semicolon)) {
            self.pos += 1;
        }
        if self.peek().is_some() {
            return Err(self.unexpected("end of query"));
        }

        Ok(SelectQuery {
            projection,
            table,
            filter,
            limit,
        })
    }

    fn projection(&mut self) -> Result<Projection> {
        if matches!(self.peek(), Some(Token::Star)) {
            self.pos += 1;
            return Ok(Projection::All);
        }
        let mut columns = vec![self.ident()?];
        while matches!(self.peek(), Some(Token::Comma)) {
            self.pos += 1;
            columns.push(self.ident()?);
        }
        Ok(Projection::Columns(columns))
    }
}

/// Parses one query.
///
/// # Errors
/// Returns a query error describing the first token outside the grammar
pub fn parse(query: &str) -> Result<SelectQuery> {
    let mut parser = Parser {
        tokens: tokenize(query)?,
        pos: 0,
    };
    parser.select()
}

/// Case-insensitive `LIKE` match with `%` and `_` wildcards.
pub fn like_matches(pattern: &str, value: &str) -> bool {
    let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
    let value: Vec<char> = value.to_lowercase().chars().collect();

    let (mut p, mut v) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while v < value.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, v));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == value[v]) {
            p += 1;
            v += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            v = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '%')
}

/// Runs a parsed query against the single table of a file source.
///
/// # Errors
/// Returns a query error for an unknown table or column
pub fn execute(query: &SelectQuery, table_name: &str, data: &TableResult) -> Result<TableResult> {
    if !query.table.eq_ignore_ascii_case(table_name) {
        return Err(RecordScoutError::query_failed(format!(
            "unknown table '{}'; file sources expose only '{}'",
            query.table, table_name
        )));
    }

    let filter = match &query.filter {
        Some(filter) => Some((resolve_column(&data.columns, &filter.column)?, &filter.pattern)),
        None => None,
    };
    let columns: Vec<String> = match &query.projection {
        Projection::All => data.columns.clone(),
        Projection::Columns(names) => names
            .iter()
            .map(|name| resolve_column(&data.columns, name).map(str::to_string))
            .collect::<Result<_>>()?,
    };

    let limit = query.limit.unwrap_or(usize::MAX);
    let rows: Vec<Row> = data
        .rows
        .iter()
        .filter(|row| match filter {
            Some((column, pattern)) => row
                .get(column)
                .and_then(scalar_text)
                .is_some_and(|text| like_matches(pattern, &text)),
            None => true,
        })
        .take(limit)
        .map(|row| {
            columns
                .iter()
                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(JsonValue::Null)))
                .collect()
        })
        .collect();

    Ok(TableResult::new(columns, rows))
}

/// Finds a column by exact name, then ignoring case.
fn resolve_column<'a>(columns: &'a [String], name: &str) -> Result<&'a str> {
    columns
        .iter()
        .find(|c| c.as_str() == name)
        .or_else(|| columns.iter().find(|c| c.eq_ignore_ascii_case(name)))
        .map(String::as_str)
        .ok_or_else(|| RecordScoutError::query_failed(format!("unknown column '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table() -> TableResult {
        let rows = vec![
            json!({"name": "Jane Doe", "city": "Oslo", "age": 34}),
            json!({"name": "Raj Patel", "city": "Pune", "age": null}),
            json!({"name": "Janet O'Neil", "city": "Cork", "age": 51}),
        ];
        TableResult::from_rows(
            rows.into_iter()
                .filter_map(|v| v.as_object().cloned())
                .collect(),
        )
    }

    #[test]
    fn test_parse_full_grammar() {
        let query = parse("select name, \"city\" FROM main_table WHERE name LIKE '%jane%' LIMIT 5;")
            .expect("valid query");
        assert_eq!(
            query,
            SelectQuery {
                projection: Projection::Columns(vec!["name".into(), "city".into()]),
                table: "main_table".into(),
                filter: Some(LikeFilter {
                    column: "name".into(),
                    pattern: "%jane%".into(),
                }),
                limit: Some(5),
            }
        );
    }

    #[test]
    fn test_parse_rejects_other_shapes() {
        for query in [
            "",
            "DELETE FROM main_table",
            "SELECT FROM main_table",
            "SELECT * FROM main_table WHERE name = 'x'",
            "SELECT * FROM main_table LIMIT ten",
            "SELECT * FROM main_table ORDER BY name",
            "SELECT * FROM main_table WHERE name LIKE 'x",
            "SELECT name, FROM main_table",
            "SELECT * FROM main_table; SELECT 1",
            "SELECT * FROM select",
        ] {
            let err = parse(query).expect_err(query);
            assert!(
                matches!(err, RecordScoutError::QueryExecution { .. }),
                "{}: {}",
                query,
                err
            );
        }
    }

    #[test]
    fn test_string_and_identifier_escapes() {
        let query = parse("SELECT \"odd\"\"col\" FROM t WHERE name LIKE 'o''neil'").expect("valid");
        assert_eq!(query.projection, Projection::Columns(vec!["odd\"col".into()]));
        assert_eq!(query.filter.expect("filter").pattern, "o'neil");
    }

    #[test]
    fn test_like_matches() {
        assert!(like_matches("%jane%", "Jane Doe"));
        assert!(like_matches("jane%", "JANE"));
        assert!(like_matches("j_ne doe", "Jane Doe"));
        assert!(like_matches("%", ""));
        assert!(!like_matches("jane", "Jane Doe"));
        assert!(!like_matches("%doe", "Jane Doe Jr"));
        assert!(like_matches("%a%e%", "Raj Patel"));
    }

    #[test]
    fn test_execute_filter_limit_projection() {
        let query = parse("SELECT NAME FROM MAIN_TABLE WHERE name LIKE '%jan%' LIMIT 1").expect("valid");
        let result = execute(&query, "main_table", &table()).expect("execute");

        assert_eq!(result.columns, vec!["name"]);
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0]["name"], "Jane Doe");
    }

    #[test]
    fn test_execute_null_never_matches() {
        let query = parse("SELECT * FROM main_table WHERE age LIKE '%'").expect("valid");
        let result = execute(&query, "main_table", &table()).expect("execute");
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_execute_unknown_table_or_column() {
        let query = parse("SELECT * FROM people").expect("valid");
        assert!(execute(&query, "main_table", &table()).is_err());

        let query = parse("SELECT salary FROM main_table").expect("valid");
        assert!(execute(&query, "main_table", &table()).is_err());
    }
}
