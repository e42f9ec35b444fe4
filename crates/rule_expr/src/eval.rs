use std::borrow::Cow;

use serde_json::Value;

use crate::RuleError;
use crate::ast::{CompareOp, Expr, Operand};

/// Request and record data a rule is evaluated against.
///
/// `request` mirrors the backend's `@request` object (`auth`, `body`,
/// `query`, `headers`, `method`); `record` is the record being accessed.
/// Relation fields hold record ids, so `user.id` resolves to the id stored
/// in `user`.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub request: &'a Value,
    pub record: &'a Value,
}

pub fn evaluate(expr: &Expr, ctx: &EvalContext<'_>) -> Result<bool, RuleError> {
    match expr {
        Expr::And(items) => {
            for item in items {
                if !evaluate(item, ctx)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Expr::Or(items) => {
            for item in items {
                if evaluate(item, ctx)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::Compare {
            left,
            op,
            any,
            right,
        } => {
            let left = resolve(left, ctx)?;
            let right = resolve(right, ctx)?;
            Ok(compare_sides(&left, *op, *any, &right))
        }
    }
}

fn resolve<'a>(operand: &'a Operand, ctx: &EvalContext<'a>) -> Result<Cow<'a, Value>, RuleError> {
    let value = match operand {
        Operand::Str(value) => Cow::Owned(Value::String(value.clone())),
        Operand::Number(value) => Cow::Owned(
            serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        ),
        Operand::Bool(value) => Cow::Owned(Value::Bool(*value)),
        Operand::Null => Cow::Owned(Value::Null),
        Operand::Identifier(path) => resolve_identifier(path, ctx)?,
    };
    Ok(value)
}

fn resolve_identifier<'a>(path: &str, ctx: &EvalContext<'a>) -> Result<Cow<'a, Value>, RuleError> {
    let (path, modifier) = match path.split_once(':') {
        Some((path, modifier)) => (path, Some(modifier)),
        None => (path, None),
    };

    let found = if let Some(rest) = path.strip_prefix("@request.") {
        let rest = legacy_body_alias(rest);
        lookup(ctx.request, &rest)
    } else if path.starts_with('@') {
        return Err(RuleError::Unsupported(path.to_string()));
    } else {
        lookup(ctx.record, path)
    };

    match modifier {
        None => Ok(found.map(Cow::Borrowed).unwrap_or(Cow::Owned(Value::Null))),
        Some("isset") => Ok(Cow::Owned(Value::Bool(found.is_some()))),
        Some("length") => {
            let len = match found {
                Some(Value::Array(items)) => items.len(),
                Some(Value::String(text)) => text.chars().count(),
                Some(Value::Null) | None => 0,
                Some(_) => 1,
            };
            Ok(Cow::Owned(Value::from(len)))
        }
        Some("lower") => Ok(Cow::Owned(match found {
            Some(Value::String(text)) => Value::String(text.to_lowercase()),
            Some(other) => other.clone(),
            None => Value::Null,
        })),
        // Arrays compare item by item in `compare_sides`.
        Some("each") => Ok(match found {
            Some(Value::Null) | None => Cow::Owned(Value::Array(Vec::new())),
            Some(value) => Cow::Borrowed(value),
        }),
        Some(other) => Err(RuleError::Unsupported(format!("{path}:{other}"))),
    }
}

/// `@request.data.*` is the pre-0.23 spelling of `@request.body.*`.
fn legacy_body_alias(rest: &str) -> Cow<'_, str> {
    match rest.strip_prefix("data.") {
        Some(tail) => Cow::Owned(format!("body.{tail}")),
        None => Cow::Borrowed(rest),
    }
}

fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    let segments: Vec<&str> = path.split('.').collect();
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        match current {
            Value::Object(map) => current = map.get(*segment)?,
            // Unexpanded relations hold the related id (or ids).
            Value::String(_) | Value::Array(_) if *segment == "id" && last => return Some(current),
            Value::Array(items) => current = items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        }
    }
    Some(current)
}

fn compare_sides(left: &Value, op: CompareOp, any: bool, right: &Value) -> bool {
    match left {
        Value::Array(items) if any => items.iter().any(|item| compare_scalar(item, op, right)),
        Value::Array(items) if !items.is_empty() => {
            items.iter().all(|item| compare_scalar(item, op, right))
        }
        Value::Array(_) => compare_scalar(&Value::Null, op, right),
        _ => match right {
            Value::Array(items) if any => items.iter().any(|item| compare_scalar(left, op, item)),
            _ => compare_scalar(left, op, right),
        },
    }
}

fn compare_scalar(left: &Value, op: CompareOp, right: &Value) -> bool {
    match op {
        CompareOp::Eq => loosely_equal(left, right),
        CompareOp::Neq => !loosely_equal(left, right),
        CompareOp::Gt => ordering(left, right).is_some_and(|o| o.is_gt()),
        CompareOp::Gte => ordering(left, right).is_some_and(|o| o.is_ge()),
        CompareOp::Lt => ordering(left, right).is_some_and(|o| o.is_lt()),
        CompareOp::Lte => ordering(left, right).is_some_and(|o| o.is_le()),
        CompareOp::Like => like(left, right),
        CompareOp::NotLike => !like(left, right),
    }
}

/// Missing values compare as the zero value of the other side, the way the
/// backend coalesces NULL columns.
fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, other) | (other, Value::Null) => is_zero_value(other),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (a, b) => as_text(a) == as_text(b),
    }
}

fn is_zero_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Bool(b) => !b,
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

fn ordering(left: &Value, right: &Value) -> Option<std::cmp::Ordering> {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(as_text(left).cmp(&as_text(right))),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(text) => text.parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Case-insensitive containment; `%` in the pattern acts as a wildcard and
/// anchors the match the way SQL `LIKE` does.
fn like(left: &Value, right: &Value) -> bool {
    let haystack = as_text(left).to_lowercase();
    let pattern = as_text(right).to_lowercase();
    if !pattern.contains('%') {
        return haystack.contains(&pattern);
    }
    wildcard_match(&haystack, &pattern)
}

fn wildcard_match(text: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    let mut rest = text;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(tail) => rest = tail,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::parse;

    fn check(rule: &str, request: Value, record: Value) -> bool {
        let expr = parse(rule).expect("parse");
        evaluate(
            &expr,
            &EvalContext {
                request: &request,
                record: &record,
            },
        )
        .expect("evaluate")
    }

    #[test]
    fn owner_reads_own_wellness_log() {
        let rule = "@request.auth.id = user.id";
        let record = json!({ "id": "log1", "user": "u_1" });
        assert!(check(rule, json!({ "auth": { "id": "u_1" } }), record.clone()));
        assert!(!check(rule, json!({ "auth": { "id": "u_2" } }), record));
    }

    #[test]
    fn guests_have_empty_auth_id() {
        let rule = r#"@request.auth.id != """#;
        assert!(!check(rule, json!({}), json!({})));
        assert!(check(rule, json!({ "auth": { "id": "u_1" } }), json!({})));
    }

    #[test]
    fn role_alternatives_with_like() {
        let rule = r#"@request.auth.role ~ "Teacher" || @request.auth.role = "Owner""#;
        assert!(check(rule, json!({ "auth": { "role": "teacher" } }), json!({})));
        assert!(check(rule, json!({ "auth": { "role": "Owner" } }), json!({})));
        assert!(!check(rule, json!({ "auth": { "role": "Student" } }), json!({})));
    }

    #[test]
    fn legacy_data_alias_reads_body() {
        let rule = "@request.data.tenantId = @request.auth.tenantId";
        let request = json!({ "auth": { "tenantId": "t1" }, "body": { "tenantId": "t1" } });
        assert!(check(rule, request, json!({})));
    }

    #[test]
    fn any_operator_over_multi_relation() {
        let rule = "members.id ?= @request.auth.id";
        let record = json!({ "members": ["u_1", "u_2"] });
        assert!(check(rule, json!({ "auth": { "id": "u_2" } }), record.clone()));
        assert!(!check(rule, json!({ "auth": { "id": "u_3" } }), record));
    }

    #[test]
    fn modifiers() {
        let record = json!({ "tags": ["a", "b", "c"] });
        assert!(check("tags:length > 2", json!({}), record));
        assert!(check("@request.body.title:isset = true", json!({ "body": { "title": "x" } }), json!({})));
    }

    #[test]
    fn each_modifier_compares_every_item() {
        let record = json!({ "tags": ["ab", "ac"] });
        assert!(check(r#"tags:each ~ "a""#, json!({}), record.clone()));
        assert!(!check(r#"tags:each ~ "b""#, json!({}), record.clone()));
        assert!(check(r#"tags:each ?~ "b""#, json!({}), record));
        assert!(!check(r#"tags:each ?= "x""#, json!({}), json!({})));
    }

    #[test]
    fn wildcard_like() {
        assert!(wildcard_match("school-admin", "school%"));
        assert!(wildcard_match("school-admin", "%admin"));
        assert!(wildcard_match("school-admin", "s%-%n"));
        assert!(!wildcard_match("school-admin", "%teacher%"));
    }

    #[test]
    fn collection_macros_are_unsupported() {
        let expr = parse("@collection.users.id = @request.auth.id").expect("parse");
        let empty = json!({});
        let err = evaluate(
            &expr,
            &EvalContext {
                request: &empty,
                record: &empty,
            },
        )
        .expect_err("unsupported");
        assert!(matches!(err, RuleError::Unsupported(_)));
    }
}
