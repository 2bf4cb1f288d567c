//! Line-oriented structural scanner.
//!
//! Recognizes the directive shapes of the plain-text ledger format:
//! top-level `option`/`plugin`/`include`/tag-stack lines, dated directives,
//! and indented postings and metadata that belong to the preceding dated
//! directive. A blank line closes the current directive block.

use serde::Serialize;

use crate::date::Date;
use crate::{Diagnostic, Ledger, Phase};

/// Flags accepted in a transaction header or in front of a posting.
const FLAG_CHARS: &[char] = &[
    '*', '!', '&', '#', '?', '%', 'P', 'S', 'T', 'C', 'U', 'R', 'M',
];

const ACCOUNT_ROOTS: &[&str] = &["Assets", "Liabilities", "Equity", "Income", "Expenses"];

/// Payload of a dated directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DirectiveKind {
    Transaction {
        flag: char,
        payee: Option<String>,
        narration: Option<String>,
    },
    Open {
        account: String,
        currencies: Vec<String>,
    },
    Close {
        account: String,
    },
    Commodity {
        currency: String,
    },
    Balance {
        account: String,
        number: String,
        currency: String,
    },
    Pad {
        account: String,
        source: String,
    },
    Note {
        account: String,
        comment: String,
    },
    Document {
        account: String,
        path: String,
    },
    Event {
        name: String,
        value: String,
    },
    Query {
        name: String,
        query: String,
    },
    Price {
        currency: String,
        number: String,
        quote: String,
    },
    Custom {
        name: String,
    },
}

/// One leg of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Posting {
    pub line: usize,
    pub flag: Option<char>,
    pub account: String,
    /// Units as written; `None` when the amount is elided.
    pub number: Option<String>,
    pub currency: Option<String>,
}

/// A dated directive together with its indented continuation lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Directive {
    pub line: usize,
    pub date: Date,
    pub kind: DirectiveKind,
    pub postings: Vec<Posting>,
    pub metadata: Vec<(String, String)>,
}

impl Directive {
    /// Keyword naming this directive in diagnostics.
    #[must_use]
    pub const fn keyword(&self) -> &'static str {
        match self.kind {
            DirectiveKind::Transaction { .. } => "transaction",
            DirectiveKind::Open { .. } => "open",
            DirectiveKind::Close { .. } => "close",
            DirectiveKind::Commodity { .. } => "commodity",
            DirectiveKind::Balance { .. } => "balance",
            DirectiveKind::Pad { .. } => "pad",
            DirectiveKind::Note { .. } => "note",
            DirectiveKind::Document { .. } => "document",
            DirectiveKind::Event { .. } => "event",
            DirectiveKind::Query { .. } => "query",
            DirectiveKind::Price { .. } => "price",
            DirectiveKind::Custom { .. } => "custom",
        }
    }

    #[must_use]
    pub const fn is_transaction(&self) -> bool {
        matches!(self.kind, DirectiveKind::Transaction { .. })
    }

    /// Accounts this directive names, in source order.
    #[must_use]
    pub fn referenced_accounts(&self) -> Vec<&str> {
        match &self.kind {
            DirectiveKind::Transaction { .. } => self
                .postings
                .iter()
                .map(|posting| posting.account.as_str())
                .collect(),
            DirectiveKind::Open { account, .. }
            | DirectiveKind::Close { account }
            | DirectiveKind::Balance { account, .. }
            | DirectiveKind::Note { account, .. }
            | DirectiveKind::Document { account, .. } => vec![account.as_str()],
            DirectiveKind::Pad { account, source } => vec![account.as_str(), source.as_str()],
            DirectiveKind::Commodity { .. }
            | DirectiveKind::Event { .. }
            | DirectiveKind::Query { .. }
            | DirectiveKind::Price { .. }
            | DirectiveKind::Custom { .. } => Vec::new(),
        }
    }
}

/// Scan ledger source text into directives and parse-phase diagnostics.
#[must_use]
pub fn scan_source(source: &str) -> Ledger {
    let mut scanner = Scanner::default();
    for (idx, raw) in source.lines().enumerate() {
        scanner.line(idx + 1, raw.trim_end_matches('\r'));
    }
    Ledger {
        directives: scanner.directives,
        diagnostics: scanner.diagnostics,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Str(String),
}

#[derive(Debug, Clone, Copy, Default)]
enum Block {
    #[default]
    None,
    Open(usize),
    /// The owning line failed to scan; swallow its continuation lines.
    Broken,
}

#[derive(Debug, Default)]
struct Scanner {
    directives: Vec<Directive>,
    diagnostics: Vec<Diagnostic>,
    block: Block,
}

impl Scanner {
    fn line(&mut self, line: usize, raw: &str) {
        if raw.trim().is_empty() {
            self.block = Block::None;
            return;
        }
        let indented = raw.starts_with(' ') || raw.starts_with('\t');
        if !indented && raw.starts_with('*') {
            // Org-mode section header.
            self.block = Block::None;
            return;
        }

        let tokens = match tokenize(raw.trim()) {
            Ok(tokens) => tokens,
            Err(message) => {
                self.error(line, message);
                if !indented {
                    self.block = Block::Broken;
                }
                return;
            }
        };
        if tokens.is_empty() {
            return;
        }

        if indented {
            self.continuation(line, &tokens);
        } else {
            self.block = Block::None;
            self.top_level(line, &tokens);
        }
    }

    fn error(&mut self, line: usize, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            phase: Phase::Parse,
            line,
            message: message.into(),
        });
    }

    fn top_level(&mut self, line: usize, tokens: &[Token]) {
        let rest = &tokens[1..];
        let outcome = match &tokens[0] {
            Token::Word(word) if word.starts_with(|c: char| c.is_ascii_digit()) => {
                match dated_directive(line, word, rest) {
                    Ok(directive) => {
                        self.directives.push(directive);
                        self.block = Block::Open(self.directives.len() - 1);
                        return;
                    }
                    Err(message) => Err(message),
                }
            }
            Token::Word(word) => match word.as_str() {
                "option" => expect_strings(rest, 2, 2, "option"),
                "plugin" => expect_strings(rest, 1, 2, "plugin"),
                "include" => expect_strings(rest, 1, 1, "include"),
                "pushtag" | "poptag" => match rest {
                    [Token::Word(tag)] if tag.starts_with('#') && tag.len() > 1 => Ok(()),
                    _ => Err(format!("Invalid {word} directive")),
                },
                "pushmeta" | "popmeta" => Ok(()),
                other => Err(format!("Syntax error: unexpected '{other}'")),
            },
            Token::Str(_) => Err("Syntax error: unexpected string".to_string()),
        };

        if let Err(message) = outcome {
            self.error(line, message);
            self.block = Block::Broken;
        }
    }

    fn continuation(&mut self, line: usize, tokens: &[Token]) {
        let idx = match self.block {
            Block::None => {
                self.error(line, "Indented line outside of a directive");
                return;
            }
            Block::Broken => return,
            Block::Open(idx) => idx,
        };

        if let Token::Word(word) = &tokens[0]
            && let Some(key) = metadata_key(word)
        {
            let value = tokens[1..]
                .iter()
                .map(|tok| match tok {
                    Token::Word(w) | Token::Str(w) => w.as_str(),
                })
                .collect::<Vec<_>>()
                .join(" ");
            self.directives[idx].metadata.push((key.to_string(), value));
            return;
        }

        if !self.directives[idx].is_transaction() {
            let keyword = self.directives[idx].keyword();
            self.error(
                line,
                format!("Unexpected indented line in {keyword} directive"),
            );
            return;
        }

        if tokens
            .iter()
            .all(|tok| matches!(tok, Token::Word(w) if w.starts_with('#') || w.starts_with('^')))
        {
            return;
        }

        match parse_posting(line, tokens) {
            Ok(posting) => self.directives[idx].postings.push(posting),
            Err(message) => self.error(line, message),
        }
    }
}

fn dated_directive(line: usize, raw_date: &str, rest: &[Token]) -> Result<Directive, String> {
    let date = Date::parse(raw_date).ok_or_else(|| format!("Invalid date '{raw_date}'"))?;
    let Some(head) = rest.first() else {
        return Err("Missing directive after date".to_string());
    };
    let args = &rest[1..];

    let kind = match head {
        Token::Str(_) => return Err("Missing flag in transaction".to_string()),
        Token::Word(keyword) => match keyword.as_str() {
            "txn" => transaction_header('*', args)?,
            flag if is_flag(flag) => {
                let ch = flag.chars().next().unwrap_or('*');
                transaction_header(ch, args)?
            }
            "open" => {
                let account = expect_account(args.first())?;
                let currencies = match args.get(1) {
                    Some(Token::Word(list)) => {
                        let currencies: Vec<String> = list
                            .split(',')
                            .filter(|c| !c.is_empty())
                            .map(str::to_string)
                            .collect();
                        if let Some(bad) = currencies.iter().find(|c| !is_currency(c)) {
                            return Err(format!("Invalid currency '{bad}'"));
                        }
                        currencies
                    }
                    _ => Vec::new(),
                };
                DirectiveKind::Open {
                    account,
                    currencies,
                }
            }
            "close" => DirectiveKind::Close {
                account: expect_account(args.first())?,
            },
            "commodity" => DirectiveKind::Commodity {
                currency: expect_currency(args.first())?,
            },
            "balance" => DirectiveKind::Balance {
                account: expect_account(args.first())?,
                number: expect_number(args.get(1))?,
                currency: expect_currency(args.get(2))?,
            },
            "pad" => DirectiveKind::Pad {
                account: expect_account(args.first())?,
                source: expect_account(args.get(1))?,
            },
            "note" => DirectiveKind::Note {
                account: expect_account(args.first())?,
                comment: expect_string(args.get(1), "note")?,
            },
            "document" => DirectiveKind::Document {
                account: expect_account(args.first())?,
                path: expect_string(args.get(1), "document")?,
            },
            "event" => DirectiveKind::Event {
                name: expect_string(args.first(), "event")?,
                value: expect_string(args.get(1), "event")?,
            },
            "query" => DirectiveKind::Query {
                name: expect_string(args.first(), "query")?,
                query: expect_string(args.get(1), "query")?,
            },
            "price" => DirectiveKind::Price {
                currency: expect_currency(args.first())?,
                number: expect_number(args.get(1))?,
                quote: expect_currency(args.get(2))?,
            },
            "custom" => DirectiveKind::Custom {
                name: expect_string(args.first(), "custom")?,
            },
            other => return Err(format!("Unknown directive '{other}'")),
        },
    };

    Ok(Directive {
        line,
        date,
        kind,
        postings: Vec::new(),
        metadata: Vec::new(),
    })
}

fn transaction_header(flag: char, args: &[Token]) -> Result<DirectiveKind, String> {
    let mut strings = Vec::new();
    for tok in args {
        match tok {
            Token::Str(s) => strings.push(s.clone()),
            Token::Word(w) if w.starts_with('#') || w.starts_with('^') => {}
            Token::Word(w) => {
                return Err(format!("Unexpected token '{w}' in transaction header"));
            }
        }
    }
    let (payee, narration) = match strings.len() {
        0 => (None, None),
        1 => (None, strings.pop()),
        2 => {
            let narration = strings.pop();
            (strings.pop(), narration)
        }
        _ => return Err("Too many strings in transaction header".to_string()),
    };
    Ok(DirectiveKind::Transaction {
        flag,
        payee,
        narration,
    })
}

fn parse_posting(line: usize, tokens: &[Token]) -> Result<Posting, String> {
    let mut rest = tokens;
    let mut flag = None;
    if let Some(Token::Word(word)) = rest.first()
        && is_flag(word)
        && rest.len() > 1
    {
        flag = word.chars().next();
        rest = &rest[1..];
    }

    let account = expect_account(rest.first())?;
    let mut number = None;
    let mut currency = None;
    match rest.get(1) {
        None => {}
        Some(Token::Word(word)) if is_number(word) => {
            number = Some(word.clone());
            if let Some(Token::Word(cur)) = rest.get(2)
                && is_currency(cur)
            {
                currency = Some(cur.clone());
            }
        }
        Some(Token::Word(word))
            if word.starts_with('(') || word.starts_with('{') || word.starts_with('@') => {}
        Some(Token::Word(word)) => return Err(format!("Invalid posting amount '{word}'")),
        Some(Token::Str(_)) => return Err("Unexpected string in posting".to_string()),
    }

    Ok(Posting {
        line,
        flag,
        account,
        number,
        currency,
    })
}

fn tokenize(line: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let Some(&c) = chars.peek() else { break };
        if c == ';' {
            break;
        }
        if c == '"' {
            chars.next();
            let mut buf = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            buf.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => buf.push(other),
                }
            }
            if !closed {
                return Err("Unterminated string".to_string());
            }
            tokens.push(Token::Str(buf));
        } else {
            let mut buf = String::new();
            while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != '"') {
                buf.push(c);
            }
            tokens.push(Token::Word(buf));
        }
    }
    Ok(tokens)
}

fn expect_strings(rest: &[Token], min: usize, max: usize, keyword: &str) -> Result<(), String> {
    let all_strings = rest.iter().all(|tok| matches!(tok, Token::Str(_)));
    if all_strings && (min..=max).contains(&rest.len()) {
        Ok(())
    } else {
        Err(format!("Invalid {keyword} directive"))
    }
}

fn expect_account(tok: Option<&Token>) -> Result<String, String> {
    match tok {
        Some(Token::Word(word)) if is_valid_account(word) => Ok(word.clone()),
        Some(Token::Word(word)) => Err(format!("Invalid account name '{word}'")),
        _ => Err("Expected account name".to_string()),
    }
}

fn expect_currency(tok: Option<&Token>) -> Result<String, String> {
    match tok {
        Some(Token::Word(word)) if is_currency(word) => Ok(word.clone()),
        Some(Token::Word(word)) => Err(format!("Invalid currency '{word}'")),
        _ => Err("Expected currency".to_string()),
    }
}

fn expect_number(tok: Option<&Token>) -> Result<String, String> {
    match tok {
        Some(Token::Word(word)) if is_number(word) => Ok(word.clone()),
        Some(Token::Word(word)) => Err(format!("Invalid number '{word}'")),
        _ => Err("Expected number".to_string()),
    }
}

fn expect_string(tok: Option<&Token>, keyword: &str) -> Result<String, String> {
    match tok {
        Some(Token::Str(s)) => Ok(s.clone()),
        _ => Err(format!("Expected string in {keyword} directive")),
    }
}

fn is_flag(word: &str) -> bool {
    let mut chars = word.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if FLAG_CHARS.contains(&c))
}

fn metadata_key(word: &str) -> Option<&str> {
    let key = word.strip_suffix(':')?;
    let mut chars = key.chars();
    let first = chars.next()?;
    if first.is_ascii_lowercase()
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        Some(key)
    } else {
        None
    }
}

/// `Root:Component[:Component...]` with a known root and capitalized or
/// numeric components.
#[must_use]
pub fn is_valid_account(name: &str) -> bool {
    let mut parts = name.split(':');
    let Some(root) = parts.next() else {
        return false;
    };
    if !ACCOUNT_ROOTS.contains(&root) {
        return false;
    }
    let mut components = 0usize;
    for part in parts {
        components += 1;
        let mut chars = part.chars();
        let Some(first) = chars.next() else {
            return false;
        };
        if !(first.is_ascii_uppercase() || first.is_ascii_digit()) {
            return false;
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return false;
        }
    }
    components > 0
}

fn is_currency(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && word.len() <= 24
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || "'._-".contains(c))
}

fn is_number(word: &str) -> bool {
    let body = word
        .strip_prefix('-')
        .or_else(|| word.strip_prefix('+'))
        .unwrap_or(word);
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let int_ok = !int_part.is_empty()
        && int_part.starts_with(|c: char| c.is_ascii_digit())
        && int_part.chars().all(|c| c.is_ascii_digit() || c == ',');
    let frac_ok = frac_part.is_none_or(|f| f.chars().all(|c| c.is_ascii_digit()));
    int_ok && frac_ok
}
