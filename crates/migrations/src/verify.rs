use std::collections::HashMap;
use std::fmt;

use schema_types::{Collection, InMemorySchemaStore, find_collection};
use serde::Serialize;
use tracing::{debug, info};

use crate::change::SchemaChange;
use crate::lint::{Severity, lint_collection};
use crate::migration::Migration;
use crate::runner::diff;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerifyIssue {
    DuplicateId {
        id: String,
    },
    OutOfOrder {
        id: String,
        previous: String,
    },
    ApplyFailed {
        id: String,
        direction: &'static str,
        error: String,
    },
    /// `down` did not restore what `up` changed.
    NotReversible {
        id: String,
        collection: String,
        detail: String,
    },
    FieldIdConflict {
        id: String,
        collection: String,
        field: String,
        expected: String,
        found: String,
    },
    InvalidRule {
        id: String,
        issue: String,
    },
}

impl fmt::Display for VerifyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyIssue::DuplicateId { id } => write!(f, "{id}: duplicate id"),
            VerifyIssue::OutOfOrder { id, previous } => {
                write!(f, "{id}: sorts before preceding migration {previous}")
            }
            VerifyIssue::ApplyFailed {
                id,
                direction,
                error,
            } => write!(f, "{id}: {direction} failed: {error}"),
            VerifyIssue::NotReversible {
                id,
                collection,
                detail,
            } => write!(f, "{id}: down does not restore `{collection}`: {detail}"),
            VerifyIssue::FieldIdConflict {
                id,
                collection,
                field,
                expected,
                found,
            } => write!(
                f,
                "{id}: field `{collection}.{field}` uses id `{found}`, earlier migrations use `{expected}`"
            ),
            VerifyIssue::InvalidRule { id, issue } => write!(f, "{id}: {issue}"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    pub checked: usize,
    pub issues: Vec<VerifyIssue>,
    /// Schema after replaying every migration that applied cleanly.
    #[serde(skip)]
    pub final_schema: Vec<Collection>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Replays `migrations` in the given order from an empty schema and checks
/// ordering, reversibility of every migration, and field id stability.
/// Replay stops at the first migration whose `up` cannot be applied.
pub async fn verify(migrations: &[Migration]) -> VerifyReport {
    let mut report = VerifyReport::default();
    check_order(migrations, &mut report);

    let mut state = InMemorySchemaStore::new();
    let mut field_ids: HashMap<(String, String), String> = HashMap::new();

    for migration in migrations {
        let id = migration.id.to_string();
        let before = state.snapshot();
        check_field_ids(&id, &migration.up, &before, &mut field_ids, &mut report);

        let forward = state.clone();
        if let Err(err) = migration.apply_up(&forward).await {
            report.issues.push(VerifyIssue::ApplyFailed {
                id,
                direction: "up",
                error: format!("{err:#}"),
            });
            break;
        }
        let after = forward.snapshot();

        for collection in &diff(&before, &after).saved {
            for issue in lint_collection(collection) {
                if issue.severity == Severity::Error {
                    report.issues.push(VerifyIssue::InvalidRule {
                        id: id.clone(),
                        issue: issue.to_string(),
                    });
                }
            }
        }

        let reverse = forward.clone();
        match migration.apply_down(&reverse).await {
            Ok(()) => compare(&id, &before, &reverse.snapshot(), &mut report),
            Err(err) => report.issues.push(VerifyIssue::ApplyFailed {
                id: id.clone(),
                direction: "down",
                error: format!("{err:#}"),
            }),
        }

        debug!(%id, "verified migration");
        report.checked += 1;
        state = forward;
    }

    report.final_schema = state.snapshot();
    info!(
        checked = report.checked,
        issues = report.issues.len(),
        "verified migrations"
    );
    report
}

fn check_order(migrations: &[Migration], report: &mut VerifyReport) {
    for pair in migrations.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        if current.id == previous.id {
            report.issues.push(VerifyIssue::DuplicateId {
                id: current.id.to_string(),
            });
        } else if current.id < previous.id {
            report.issues.push(VerifyIssue::OutOfOrder {
                id: current.id.to_string(),
                previous: previous.id.to_string(),
            });
        }
    }
}

/// Records the id each (collection, field name) pair is introduced with and
/// reports later migrations that use a different one.
fn check_field_ids(
    id: &str,
    changes: &[SchemaChange],
    before: &[Collection],
    seen: &mut HashMap<(String, String), String>,
    report: &mut VerifyReport,
) {
    let mut check = |collection: &Collection, field_name: &str, field_id: &str| {
        let key = (collection.id.clone(), field_name.to_ascii_lowercase());
        match seen.get(&key) {
            Some(expected) if expected != field_id => {
                report.issues.push(VerifyIssue::FieldIdConflict {
                    id: id.to_string(),
                    collection: collection.name.clone(),
                    field: field_name.to_string(),
                    expected: expected.clone(),
                    found: field_id.to_string(),
                });
            }
            Some(_) => {}
            None => {
                seen.insert(key, field_id.to_string());
            }
        }
    };

    for change in changes {
        match change {
            SchemaChange::CreateCollection { collection } => {
                for field in &collection.fields {
                    check(collection, &field.name, &field.id);
                }
            }
            SchemaChange::AddField {
                collection, field, ..
            } => {
                if let Ok(target) = find_collection(before, collection) {
                    check(&target, &field.name, &field.id);
                }
            }
            _ => {}
        }
    }
}

/// Compares the schema before a migration with the schema after `up` then
/// `down`. Collections are matched by id; their order is not significant.
fn compare(id: &str, before: &[Collection], restored: &[Collection], report: &mut VerifyReport) {
    let restored_by_id: HashMap<&str, &Collection> =
        restored.iter().map(|c| (c.id.as_str(), c)).collect();

    for original in before {
        let detail = match restored_by_id.get(original.id.as_str()) {
            None => Some("collection is missing".to_string()),
            Some(current) => describe(original, current),
        };
        if let Some(detail) = detail {
            report.issues.push(VerifyIssue::NotReversible {
                id: id.to_string(),
                collection: original.name.clone(),
                detail,
            });
        }
    }

    for leftover in restored {
        if !before.iter().any(|c| c.id == leftover.id) {
            report.issues.push(VerifyIssue::NotReversible {
                id: id.to_string(),
                collection: leftover.name.clone(),
                detail: "collection was left behind".to_string(),
            });
        }
    }
}

fn describe(expected: &Collection, actual: &Collection) -> Option<String> {
    if expected == actual {
        return None;
    }
    let mut parts = Vec::new();
    if expected.name != actual.name {
        parts.push(format!("renamed to `{}`", actual.name));
    }
    for field in &expected.fields {
        match actual.fields.get_by_id(&field.id) {
            None => parts.push(format!("field `{}` is missing", field.name)),
            Some(current) if current != field => {
                parts.push(format!("field `{}` differs", field.name))
            }
            Some(_) => {
                if expected.fields.position_of(&field.id) != actual.fields.position_of(&field.id) {
                    parts.push(format!("field `{}` moved", field.name));
                }
            }
        }
    }
    for field in &actual.fields {
        if expected.fields.get_by_id(&field.id).is_none() {
            parts.push(format!("field `{}` was left behind", field.name));
        }
    }
    if expected.rules != actual.rules {
        parts.push("rules differ".to_string());
    }
    if expected.indexes != actual.indexes {
        parts.push("indexes differ".to_string());
    }
    if parts.is_empty() {
        parts.push("collection options differ".to_string());
    }
    Some(parts.join(", "))
}

#[cfg(test)]
mod tests {
    use schema_types::{Field, RuleSet};

    use super::*;

    fn create_logs() -> Migration {
        Migration::new(
            "1700000000_created_logs".parse().expect("id"),
            vec![SchemaChange::CreateCollection {
                collection: Collection::base("pbc_1", "logs").with_field(Field::text("text1", "notes")),
            }],
            vec![SchemaChange::DeleteCollection {
                collection: "pbc_1".into(),
            }],
        )
    }

    fn add_steps(id: &str, field_id: &str) -> Migration {
        Migration::new(
            id.parse().expect("id"),
            vec![SchemaChange::AddField {
                collection: "logs".into(),
                position: Some(1),
                field: Field::number(field_id, "steps"),
            }],
            vec![SchemaChange::RemoveField {
                collection: "logs".into(),
                field_id: field_id.into(),
            }],
        )
    }

    #[tokio::test]
    async fn reversible_history_is_clean() {
        let report = verify(&[
            create_logs(),
            add_steps("1700000100_updated_logs", "number1"),
        ])
        .await;
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!(report.checked, 2);
        let logs = find_collection(&report.final_schema, "logs").expect("logs");
        assert_eq!(logs.fields.position_of("number1"), Some(1));
    }

    #[tokio::test]
    async fn incomplete_down_is_reported() {
        let mut sloppy = add_steps("1700000100_updated_logs", "number1");
        sloppy.up.push(SchemaChange::ReplaceRules {
            collection: "logs".into(),
            rules: RuleSet::uniform("@request.auth.id != \"\""),
        });
        let report = verify(&[create_logs(), sloppy]).await;
        assert_eq!(
            report.issues,
            vec![VerifyIssue::NotReversible {
                id: "1700000100_updated_logs".into(),
                collection: "logs".into(),
                detail: "rules differ".into(),
            }]
        );
    }

    #[tokio::test]
    async fn moved_field_is_not_a_clean_reversal() {
        let mut reorder = add_steps("1700000100_updated_logs", "number1");
        reorder.up = vec![SchemaChange::RemoveField {
            collection: "logs".into(),
            field_id: "text1".into(),
        }];
        reorder.down = vec![SchemaChange::AddField {
            collection: "logs".into(),
            position: Some(0),
            field: Field::text("text1", "notes"),
        }];
        let report = verify(&[create_logs(), reorder]).await;
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].to_string().contains("moved"));
    }

    #[tokio::test]
    async fn out_of_order_and_conflicting_ids_are_reported() {
        let mut relabel = add_steps("1700000200_updated_logs", "number2");
        relabel.up = vec![SchemaChange::RemoveField {
            collection: "logs".into(),
            field_id: "number1".into(),
        }];
        relabel.down = vec![SchemaChange::AddField {
            collection: "logs".into(),
            position: Some(1),
            field: Field::number("number1", "steps"),
        }];
        let report = verify(&[
            create_logs(),
            add_steps("1700000100_updated_logs", "number1"),
            relabel,
            add_steps("1700000150_updated_logs", "number9"),
        ])
        .await;

        assert!(report.issues.contains(&VerifyIssue::OutOfOrder {
            id: "1700000150_updated_logs".into(),
            previous: "1700000200_updated_logs".into(),
        }));
        assert!(report.issues.iter().any(|issue| matches!(
            issue,
            VerifyIssue::FieldIdConflict { expected, found, .. } if expected == "number1" && found == "number9"
        )));
    }

    #[tokio::test]
    async fn replay_stops_at_failed_up() {
        let report = verify(&[add_steps("1700000100_updated_logs", "number1"), create_logs()]).await;
        assert_eq!(report.checked, 0);
        assert!(matches!(
            report.issues.last(),
            Some(VerifyIssue::ApplyFailed { direction: "up", .. })
        ));
    }
}
