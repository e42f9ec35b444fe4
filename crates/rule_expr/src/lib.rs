//! Parser, linter and evaluator for collection access-rule expressions such
//! as `@request.auth.id != "" && tenantId = @request.auth.tenantId`.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;

use thiserror::Error;

pub use ast::{CompareOp, Expr, Operand};
pub use eval::{EvalContext, evaluate};
pub use parser::parse;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuleError {
    #[error("empty expression")]
    Empty,
    #[error("unexpected character `{ch}` at {pos}")]
    UnexpectedChar { pos: usize, ch: char },
    #[error("unterminated string starting at {pos}")]
    UnterminatedString { pos: usize },
    #[error("invalid number `{raw}` at {pos}")]
    InvalidNumber { pos: usize, raw: String },
    #[error("unexpected {found} at {pos}")]
    UnexpectedToken { pos: usize, found: String },
    #[error("expected a comparison operator at {pos}, found {found}")]
    MissingOperator { pos: usize, found: String },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("parentheses nested deeper than {max} at {pos}")]
    TooDeep { pos: usize, max: usize },
    #[error("`{0}` cannot be evaluated locally")]
    Unsupported(String),
}

/// How a rule slot gates an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Access {
    /// `null`: superusers only.
    Locked,
    /// `""`: anyone, including guests.
    Public,
    Filter(Expr),
}

impl Access {
    pub fn label(&self) -> &'static str {
        match self {
            Access::Locked => "locked",
            Access::Public => "public",
            Access::Filter(_) => "filter",
        }
    }
}

pub fn classify(rule: Option<&str>) -> Result<Access, RuleError> {
    match rule {
        None => Ok(Access::Locked),
        Some(text) if is_blank(text) => Ok(Access::Public),
        Some(text) => parse(text).map(Access::Filter),
    }
}

/// Decides whether a request may perform an operation guarded by `rule`.
/// Superuser requests bypass every rule.
pub fn allows(rule: Option<&str>, ctx: &EvalContext<'_>, superuser: bool) -> Result<bool, RuleError> {
    if superuser {
        return Ok(true);
    }
    match classify(rule)? {
        Access::Locked => Ok(false),
        Access::Public => Ok(true),
        Access::Filter(expr) => evaluate(&expr, ctx),
    }
}

/// Blank once comments are removed.
fn is_blank(text: &str) -> bool {
    text.lines()
        .map(|line| line.split("//").next().unwrap_or(""))
        .all(|line| line.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn classifies_rule_slots() {
        assert_eq!(classify(None), Ok(Access::Locked));
        assert_eq!(classify(Some("")), Ok(Access::Public));
        assert_eq!(classify(Some("  // open to all\n")), Ok(Access::Public));
        assert!(matches!(
            classify(Some("@request.auth.id = user.id")),
            Ok(Access::Filter(_))
        ));
        assert!(classify(Some("@request.auth.id =")).is_err());
    }

    #[test]
    fn locked_rules_only_admit_superusers() {
        let empty = json!({});
        let ctx = EvalContext {
            request: &empty,
            record: &empty,
        };
        assert_eq!(allows(None, &ctx, false), Ok(false));
        assert_eq!(allows(None, &ctx, true), Ok(true));
        assert_eq!(allows(Some(""), &ctx, false), Ok(true));
    }

    #[test]
    fn field_references_skip_macros() {
        let expr = parse(
            r#"@request.auth.id != "" && tenantId = @request.auth.tenantId && (studentId = @request.auth.id || user.role ~ "x" || tags:length > 0)"#,
        )
        .expect("parse");
        let fields: Vec<String> = expr.field_references().into_iter().collect();
        assert_eq!(fields, vec!["studentId", "tags", "tenantId", "user"]);
    }
}
