use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Like => "~",
            CompareOp::NotLike => "!~",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// `@request.auth.id`, `user.id`, `tags:length`, ...
    Identifier(String),
    Str(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl Operand {
    /// Bare record field name (first path segment, modifiers stripped), or
    /// `None` for `@` macros and literals.
    pub fn record_field(&self) -> Option<&str> {
        let Operand::Identifier(path) = self else {
            return None;
        };
        if path.starts_with('@') {
            return None;
        }
        let head = path.split('.').next().unwrap_or(path);
        Some(head.split(':').next().unwrap_or(head))
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Identifier(path) => f.write_str(path),
            Operand::Str(value) => write!(f, "\"{}\"", value.replace('"', "\\\"")),
            Operand::Number(value) => write!(f, "{value}"),
            Operand::Bool(value) => write!(f, "{value}"),
            Operand::Null => f.write_str("null"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        left: Operand,
        op: CompareOp,
        /// `?=`-style comparison: any element of a multi-valued side matches.
        any: bool,
        right: Operand,
    },
}

impl Expr {
    /// Record fields the expression reads, excluding `@request`/`@collection`
    /// macros.
    pub fn field_references(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_fields(out);
                }
            }
            Expr::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if let Some(name) = operand.record_field() {
                        out.insert(name.to_string());
                    }
                }
            }
        }
    }

    /// All identifiers, macros included.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_identifiers(&mut out);
        out
    }

    fn collect_identifiers<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::And(items) | Expr::Or(items) => {
                for item in items {
                    item.collect_identifiers(out);
                }
            }
            Expr::Compare { left, right, .. } => {
                for operand in [left, right] {
                    if let Operand::Identifier(path) = operand {
                        out.push(path.as_str());
                    }
                }
            }
        }
    }

    fn fmt_nested(&self, f: &mut fmt::Formatter<'_>, parent_is_and: bool) -> fmt::Result {
        match self {
            Expr::Or(_) if parent_is_and => {
                f.write_str("(")?;
                fmt::Display::fmt(self, f)?;
                f.write_str(")")
            }
            _ => fmt::Display::fmt(self, f),
        }
    }
}

/// Canonical single-spaced form.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::And(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" && ")?;
                    }
                    item.fmt_nested(f, true)?;
                }
                Ok(())
            }
            Expr::Or(items) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" || ")?;
                    }
                    item.fmt_nested(f, false)?;
                }
                Ok(())
            }
            Expr::Compare {
                left,
                op,
                any,
                right,
            } => {
                let prefix = if *any { "?" } else { "" };
                write!(f, "{left} {prefix}{} {right}", op.symbol())
            }
        }
    }
}
