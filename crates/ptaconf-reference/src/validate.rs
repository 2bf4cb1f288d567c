//! Account lifecycle validation over scanned directives.

use std::collections::BTreeMap;

use crate::date::Date;
use crate::scanner::{Directive, DirectiveKind};
use crate::{Diagnostic, Phase};

#[derive(Debug, Clone, Copy)]
struct Lifecycle {
    opened: Date,
    closed: Option<Date>,
}

/// Check every account reference against the open/close history.
///
/// Directives are visited in date order (stable on source order) so a same-day
/// open precedes its first use regardless of file layout.
#[must_use]
pub fn validate_directives(directives: &[Directive]) -> Vec<Diagnostic> {
    let mut ordered: Vec<&Directive> = directives.iter().collect();
    ordered.sort_by_key(|directive| (directive.date, open_rank(directive), directive.line));

    let mut accounts: BTreeMap<&str, Lifecycle> = BTreeMap::new();
    let mut findings = Vec::new();
    let mut push = |line: usize, message: String| {
        findings.push(Diagnostic {
            phase: Phase::Validate,
            line,
            message,
        });
    };

    for directive in ordered {
        match &directive.kind {
            DirectiveKind::Open { account, .. } => {
                if accounts.contains_key(account.as_str()) {
                    push(
                        directive.line,
                        format!("Duplicate open directive for account '{account}'"),
                    );
                } else {
                    accounts.insert(
                        account.as_str(),
                        Lifecycle {
                            opened: directive.date,
                            closed: None,
                        },
                    );
                }
            }
            DirectiveKind::Close { account } => match accounts.get_mut(account.as_str()) {
                None => push(
                    directive.line,
                    format!("Invalid reference to unknown account '{account}'"),
                ),
                Some(state) if state.closed.is_some() => push(
                    directive.line,
                    format!("Account '{account}' is already closed"),
                ),
                Some(state) => state.closed = Some(directive.date),
            },
            _ => {
                for account in directive.referenced_accounts() {
                    let line = directive
                        .postings
                        .iter()
                        .find(|posting| posting.account == account)
                        .map_or(directive.line, |posting| posting.line);
                    match accounts.get(account) {
                        None => push(
                            line,
                            format!("Invalid reference to unknown account '{account}'"),
                        ),
                        Some(state) if state.closed.is_some_and(|closed| directive.date > closed) => {
                            push(
                                line,
                                format!("Invalid reference to inactive account '{account}'"),
                            );
                        }
                        Some(state) if directive.date < state.opened => push(
                            line,
                            format!("Invalid reference to unknown account '{account}'"),
                        ),
                        Some(_) => {}
                    }
                }
            }
        }
    }

    findings.sort_by_key(|diag| diag.line);
    findings
}

fn open_rank(directive: &Directive) -> u8 {
    match directive.kind {
        DirectiveKind::Open { .. } => 0,
        DirectiveKind::Close { .. } => 2,
        _ => 1,
    }
}
