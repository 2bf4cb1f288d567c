//! Projection-only query evaluation over posting rows.
//!
//! Supported surface:
//!
//! ```text
//! SELECT [DISTINCT] <column> [, <column>...] | *
//!     [WHERE <column> = '<literal>' [AND ...]]
//!     [LIMIT <n>]
//! ```
//!
//! Columns: `date`, `flag`, `payee`, `narration`, `account`, `number`,
//! `currency`. Aggregation, grouping and ordering are rejected with a
//! diagnostic rather than approximated.

use serde::Serialize;
use thiserror::Error;

use crate::Ledger;
use crate::scanner::DirectiveKind;

const COLUMNS: &[&str] = &[
    "date",
    "flag",
    "payee",
    "narration",
    "account",
    "number",
    "currency",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Empty query")]
    Empty,
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),
    #[error("Unsupported statement '{0}'")]
    UnsupportedStatement(String),
    #[error("Unsupported clause '{0}'")]
    UnsupportedClause(String),
}

/// Result set of a query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Literal(String),
    Comma,
    Star,
    Eq,
}

#[derive(Debug)]
struct Statement {
    distinct: bool,
    columns: Vec<String>,
    filters: Vec<(String, String)>,
    limit: Option<usize>,
}

/// Evaluate `query` over the postings of `ledger`, one row per posting in
/// source order.
pub fn run_query(ledger: &Ledger, query: &str) -> Result<QueryTable, QueryError> {
    let statement = parse_statement(query)?;

    let mut rows: Vec<Vec<Option<String>>> = Vec::new();
    'postings: for directive in &ledger.directives {
        let DirectiveKind::Transaction {
            flag,
            payee,
            narration,
        } = &directive.kind
        else {
            continue;
        };
        for posting in &directive.postings {
            let cell = |column: &str| -> Option<String> {
                match column {
                    "date" => Some(directive.date.to_string()),
                    "flag" => Some(posting.flag.unwrap_or(*flag).to_string()),
                    "payee" => payee.clone(),
                    "narration" => narration.clone(),
                    "account" => Some(posting.account.clone()),
                    "number" => posting.number.clone(),
                    "currency" => posting.currency.clone(),
                    _ => None,
                }
            };
            let selected = statement
                .filters
                .iter()
                .all(|(column, literal)| cell(column).as_deref() == Some(literal.as_str()));
            if !selected {
                continue;
            }
            let row: Vec<Option<String>> = statement.columns.iter().map(|c| cell(c)).collect();
            if statement.distinct && rows.contains(&row) {
                continue;
            }
            rows.push(row);
            if statement.limit.is_some_and(|limit| rows.len() >= limit) {
                break 'postings;
            }
        }
    }
    if statement.limit == Some(0) {
        rows.clear();
    }

    Ok(QueryTable {
        columns: statement.columns,
        rows,
    })
}

fn parse_statement(query: &str) -> Result<Statement, QueryError> {
    let tokens = lex(query)?;
    let mut iter = tokens.into_iter().peekable();

    let keyword = match iter.next() {
        None => return Err(QueryError::Empty),
        Some(Tok::Ident(word)) => word,
        Some(other) => {
            return Err(QueryError::Syntax(format!(
                "expected SELECT, found {other:?}"
            )));
        }
    };
    match keyword.to_ascii_uppercase().as_str() {
        "SELECT" => {}
        "BALANCES" | "JOURNAL" | "PRINT" => {
            return Err(QueryError::UnsupportedStatement(keyword.to_ascii_uppercase()));
        }
        _ => return Err(QueryError::Syntax(format!("expected SELECT, found '{keyword}'"))),
    }

    let distinct = iter
        .next_if(|tok| matches!(tok, Tok::Ident(w) if w.eq_ignore_ascii_case("DISTINCT")))
        .is_some();

    let mut columns = Vec::new();
    loop {
        match iter.next() {
            Some(Tok::Star) => columns.extend(COLUMNS.iter().map(|c| (*c).to_string())),
            Some(Tok::Ident(name)) => columns.push(resolve_column(&name)?),
            other => {
                return Err(QueryError::Syntax(format!(
                    "expected column, found {other:?}"
                )));
            }
        }
        if iter.next_if_eq(&Tok::Comma).is_none() {
            break;
        }
    }

    let mut filters = Vec::new();
    let mut limit = None;
    while let Some(tok) = iter.next() {
        let Tok::Ident(word) = tok else {
            return Err(QueryError::Syntax(format!("unexpected {tok:?}")));
        };
        match word.to_ascii_uppercase().as_str() {
            "WHERE" => loop {
                let column = match iter.next() {
                    Some(Tok::Ident(name)) => resolve_column(&name)?,
                    other => {
                        return Err(QueryError::Syntax(format!(
                            "expected column in WHERE, found {other:?}"
                        )));
                    }
                };
                if iter.next() != Some(Tok::Eq) {
                    return Err(QueryError::UnsupportedClause(
                        "WHERE with non-equality predicate".to_string(),
                    ));
                }
                let Some(Tok::Literal(value)) = iter.next() else {
                    return Err(QueryError::Syntax("expected string literal".to_string()));
                };
                filters.push((column, value));
                if iter
                    .next_if(|tok| matches!(tok, Tok::Ident(w) if w.eq_ignore_ascii_case("AND")))
                    .is_none()
                {
                    break;
                }
            },
            "LIMIT" => {
                let parsed = match iter.next() {
                    Some(Tok::Ident(n)) => n.parse::<usize>().ok(),
                    _ => None,
                };
                limit = Some(parsed.ok_or_else(|| {
                    QueryError::Syntax("LIMIT expects a non-negative integer".to_string())
                })?);
            }
            "FROM" | "GROUP" | "ORDER" | "HAVING" | "PIVOT" => {
                let clause = word.to_ascii_uppercase();
                let clause = if clause == "GROUP" || clause == "ORDER" {
                    format!("{clause} BY")
                } else {
                    clause
                };
                return Err(QueryError::UnsupportedClause(clause));
            }
            _ => return Err(QueryError::Syntax(format!("unexpected '{word}'"))),
        }
    }

    Ok(Statement {
        distinct,
        columns,
        filters,
        limit,
    })
}

fn resolve_column(name: &str) -> Result<String, QueryError> {
    let lowered = name.to_ascii_lowercase();
    if COLUMNS.contains(&lowered.as_str()) {
        Ok(lowered)
    } else {
        Err(QueryError::UnknownColumn(name.to_string()))
    }
}

fn lex(query: &str) -> Result<Vec<Tok>, QueryError> {
    let mut tokens = Vec::new();
    let mut chars = query.trim().trim_end_matches(';').chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            ',' => tokens.push(Tok::Comma),
            '*' => tokens.push(Tok::Star),
            '=' => tokens.push(Tok::Eq),
            '\'' | '"' => {
                let mut buf = String::new();
                let mut closed = false;
                for next in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    buf.push(next);
                }
                if !closed {
                    return Err(QueryError::Syntax("unterminated string literal".to_string()));
                }
                tokens.push(Tok::Literal(buf));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut buf = String::from(c);
                while let Some(next) =
                    chars.next_if(|n| n.is_ascii_alphanumeric() || *n == '_' || *n == '.')
                {
                    buf.push(next);
                }
                tokens.push(Tok::Ident(buf));
            }
            other => {
                return Err(QueryError::Syntax(format!("unexpected character '{other}'")));
            }
        }
    }
    Ok(tokens)
}
