use std::fmt;

use rule_expr::{Access, RuleError, classify};
use schema_types::{Collection, RuleKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleIssue {
    pub collection: String,
    pub rule: RuleKind,
    pub severity: Severity,
    pub message: String,
    pub syntax: Option<RuleError>,
}

impl fmt::Display for RuleIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{level}: {}.{}: {}", self.collection, self.rule, self.message)
    }
}

/// Checks every rule of `collection`: syntax errors are errors, references
/// to fields the collection does not have are warnings.
pub fn lint_collection(collection: &Collection) -> Vec<RuleIssue> {
    let mut issues = Vec::new();
    for (kind, rule) in collection.rules.iter() {
        let expr = match classify(rule) {
            Ok(Access::Filter(expr)) => expr,
            Ok(_) => continue,
            Err(err) => {
                issues.push(RuleIssue {
                    collection: collection.name.clone(),
                    rule: kind,
                    severity: Severity::Error,
                    message: err.to_string(),
                    syntax: Some(err),
                });
                continue;
            }
        };

        for field in expr.field_references() {
            if collection.fields.get_by_name(&field).is_none() {
                issues.push(RuleIssue {
                    collection: collection.name.clone(),
                    rule: kind,
                    severity: Severity::Warning,
                    message: format!("references unknown field `{field}`"),
                    syntax: None,
                });
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use schema_types::{Field, RuleSet, USERS_COLLECTION_ID};

    use super::*;

    #[test]
    fn clean_rules_produce_no_issues() {
        let logs = Collection::base("pbc_926415452", "wellness_logs")
            .with_field(Field::relation("relation1", "user", USERS_COLLECTION_ID))
            .with_rules(RuleSet::uniform("@request.auth.id = user.id").with(RuleKind::Create, ""));
        assert!(lint_collection(&logs).is_empty());
    }

    #[test]
    fn unknown_fields_warn_and_syntax_errors_fail() {
        let classes = Collection::base("pbc_1", "classes").with_rules(
            RuleSet::locked()
                .with(RuleKind::List, "tenantId = @request.auth.tenantId")
                .with(RuleKind::Delete, "@request.auth.role = "),
        );
        let issues = lint_collection(&classes);
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, Severity::Warning);
        assert!(issues[0].message.contains("tenantId"));
        assert_eq!(issues[1].severity, Severity::Error);
        assert_eq!(issues[1].rule, RuleKind::Delete);
        assert_eq!(
            issues[1].to_string(),
            "error: classes.deleteRule: unexpected end of expression"
        );
    }
}
