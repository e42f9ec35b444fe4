use crate::RuleError;
use crate::ast::{Expr, Operand};
use crate::lexer::{Spanned, Token, tokenize};

const MAX_DEPTH: usize = 256;

/// Parses a non-empty filter expression.
pub fn parse(input: &str) -> Result<Expr, RuleError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(RuleError::Empty);
    }
    let mut parser = Parser {
        tokens,
        cursor: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    if let Some(extra) = parser.peek() {
        return Err(RuleError::UnexpectedToken {
            pos: extra.pos,
            found: describe(&extra.token),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.cursor)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().is_some_and(|s| &s.token == expected) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn parse_or(&mut self) -> Result<Expr, RuleError> {
        let mut items = vec![self.parse_and()?];
        while self.eat(&Token::Or) {
            items.push(self.parse_and()?);
        }
        Ok(flatten(items, Expr::Or))
    }

    fn parse_and(&mut self) -> Result<Expr, RuleError> {
        let mut items = vec![self.parse_primary()?];
        while self.eat(&Token::And) {
            items.push(self.parse_primary()?);
        }
        Ok(flatten(items, Expr::And))
    }

    fn parse_primary(&mut self) -> Result<Expr, RuleError> {
        if let Some(Spanned {
            token: Token::LParen,
            pos,
        }) = self.peek()
        {
            if self.depth >= MAX_DEPTH {
                return Err(RuleError::TooDeep {
                    pos: *pos,
                    max: MAX_DEPTH,
                });
            }
            self.cursor += 1;
            self.depth += 1;
            let inner = self.parse_or();
            self.depth -= 1;
            let inner = inner?;
            return match self.advance() {
                Some(Spanned {
                    token: Token::RParen,
                    ..
                }) => Ok(inner),
                Some(other) => Err(RuleError::UnexpectedToken {
                    pos: other.pos,
                    found: describe(&other.token),
                }),
                None => Err(RuleError::UnexpectedEnd),
            };
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, RuleError> {
        let left = self.parse_operand()?;
        let (op, any) = match self.advance() {
            Some(Spanned {
                token: Token::Compare { op, any },
                ..
            }) => (op, any),
            Some(other) => {
                return Err(RuleError::MissingOperator {
                    pos: other.pos,
                    found: describe(&other.token),
                });
            }
            None => return Err(RuleError::UnexpectedEnd),
        };
        let right = self.parse_operand()?;
        Ok(Expr::Compare {
            left,
            op,
            any,
            right,
        })
    }

    fn parse_operand(&mut self) -> Result<Operand, RuleError> {
        let Some(spanned) = self.advance() else {
            return Err(RuleError::UnexpectedEnd);
        };
        let operand = match spanned.token {
            Token::Identifier(name) => match name.as_str() {
                "true" => Operand::Bool(true),
                "false" => Operand::Bool(false),
                "null" => Operand::Null,
                _ => Operand::Identifier(name),
            },
            Token::Str(value) => Operand::Str(value),
            Token::Number(value) => Operand::Number(value),
            other => {
                return Err(RuleError::UnexpectedToken {
                    pos: spanned.pos,
                    found: describe(&other),
                });
            }
        };
        Ok(operand)
    }
}

/// Collapses single-item groups and merges nested groups of the same kind.
fn flatten(items: Vec<Expr>, wrap: fn(Vec<Expr>) -> Expr) -> Expr {
    if items.len() == 1 {
        return items.into_iter().next().unwrap_or(Expr::And(Vec::new()));
    }
    let probe = wrap(Vec::new());
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match (&probe, item) {
            (Expr::And(_), Expr::And(inner)) | (Expr::Or(_), Expr::Or(inner)) => out.extend(inner),
            (_, other) => out.push(other),
        }
    }
    wrap(out)
}

fn describe(token: &Token) -> String {
    match token {
        Token::Identifier(name) => format!("identifier `{name}`"),
        Token::Str(value) => format!("string \"{value}\""),
        Token::Number(value) => format!("number {value}"),
        Token::Compare { op, any } => {
            format!("operator `{}{}`", if *any { "?" } else { "" }, op.symbol())
        }
        Token::And => "`&&`".to_string(),
        Token::Or => "`||`".to_string(),
        Token::LParen => "`(`".to_string(),
        Token::RParen => "`)`".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::CompareOp;

    #[test]
    fn and_binds_tighter_than_or() {
        let expr = parse(r#"@request.auth.id != "" && tenantId = @request.auth.tenantId || @request.auth.role = "Owner""#)
            .expect("parse");
        let Expr::Or(items) = &expr else {
            panic!("expected or, got {expr:?}");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(&items[0], Expr::And(inner) if inner.len() == 2));
    }

    #[test]
    fn parenthesised_groups_keep_structure() {
        let expr = parse(
            r#"@request.auth.id != "" && (teacherId = @request.auth.id || @request.auth.role = "SchoolAdmin" || @request.auth.role = "Owner")"#,
        )
        .expect("parse");
        let Expr::And(items) = &expr else {
            panic!("expected and");
        };
        assert!(matches!(&items[1], Expr::Or(inner) if inner.len() == 3));
        assert_eq!(
            expr.to_string(),
            r#"@request.auth.id != "" && (teacherId = @request.auth.id || @request.auth.role = "SchoolAdmin" || @request.auth.role = "Owner")"#
        );
    }

    #[test]
    fn literals_are_recognised() {
        let expr = parse("verified = true && deletedAt = null").expect("parse");
        let Expr::And(items) = expr else {
            panic!("expected and");
        };
        assert_eq!(
            items[0],
            Expr::Compare {
                left: Operand::Identifier("verified".into()),
                op: CompareOp::Eq,
                any: false,
                right: Operand::Bool(true),
            }
        );
    }

    #[test]
    fn reports_missing_operator() {
        let err = parse("@request.auth.id user").expect_err("missing op");
        assert!(matches!(err, RuleError::MissingOperator { pos: 17, .. }));
    }

    #[test]
    fn reports_unbalanced_parens() {
        assert_eq!(parse("(a = 1").expect_err("open"), RuleError::UnexpectedEnd);
        assert!(matches!(
            parse("a = 1)").expect_err("close"),
            RuleError::UnexpectedToken { pos: 5, .. }
        ));
    }

    #[test]
    fn deep_nesting_is_rejected_without_recursing() {
        let depth = 200_000;
        let rule = format!("{}a = 1{}", "(".repeat(depth), ")".repeat(depth));
        assert_eq!(
            parse(&rule).expect_err("too deep"),
            RuleError::TooDeep {
                pos: MAX_DEPTH,
                max: MAX_DEPTH
            }
        );

        let rule = format!("{}a = 1{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(parse(&rule).is_ok());
    }

    #[test]
    fn trailing_operator_is_an_error() {
        assert_eq!(parse("a = 1 &&").expect_err("dangling"), RuleError::UnexpectedEnd);
    }
}
