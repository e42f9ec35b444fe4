//! The project's migration history, compiled in. Field ids follow the
//! backend's `<type><number>` convention and must never be reused for a
//! different field.

use schema_types::{
    Collection, Field, FieldKind, FileOptions, JsonOptions, RelationOptions, RuleKind, RuleSet,
    SelectOptions, TextOptions, USERS_COLLECTION_ID,
};

use crate::MigrationError;
use crate::change::SchemaChange;
use crate::id::{MigrationAction, MigrationId};
use crate::migration::Migration;
use crate::set::MigrationSet;

pub const TENANTS_ID: &str = "pbc_699394385";
pub const CLASSES_ID: &str = "pbc_2478702895";
pub const WELLNESS_ENTRIES_ID: &str = "pbc_3312804114";
pub const WELLNESS_LOGS_ID: &str = "pbc_926415452";

/// Every built-in migration, ascending.
pub fn builtin() -> Vec<Migration> {
    vec![
        created_tenants(),
        created_users(),
        created_classes(),
        created_wellness_entries(),
        created_wellness_logs(),
        updated_tenants_billing(),
        updated_wellness_logs_steps(),
        updated_wellness_logs_rules(),
        deleted_wellness_entries(),
        updated_classes_schedule(),
    ]
}

pub fn builtin_set() -> Result<MigrationSet, MigrationError> {
    MigrationSet::new(builtin())
}

fn migration(
    timestamp: u64,
    action: MigrationAction,
    collection: &str,
    up: Vec<SchemaChange>,
    down: Vec<SchemaChange>,
) -> Migration {
    Migration::new(MigrationId::new(timestamp, action, collection), up, down)
}

/// Inserts `fields` after the primary key so the default `created` and
/// `updated` fields stay last.
fn with_fields(mut collection: Collection, fields: Vec<Field>) -> Collection {
    for (offset, field) in fields.into_iter().enumerate() {
        collection.fields.add_at(1 + offset, field);
    }
    collection
}

fn select(id: &str, name: &str, max_select: u32, values: &[&str]) -> Field {
    Field::new(
        id,
        name,
        FieldKind::Select(SelectOptions {
            max_select,
            values: values.iter().map(|v| v.to_string()).collect(),
        }),
    )
}

fn relation(id: &str, name: &str, target: &str, cascade_delete: bool) -> Field {
    Field::new(
        id,
        name,
        FieldKind::Relation(RelationOptions {
            cascade_delete,
            collection_id: target.to_string(),
            max_select: 1,
            min_select: 0,
        }),
    )
}

fn json(id: &str, name: &str, max_size: u64) -> Field {
    Field::new(id, name, FieldKind::Json(JsonOptions { max_size }))
}

fn tenant_id_field(id: &str, autogenerate_pattern: &str, len: u32) -> Field {
    Field::new(
        id,
        "id",
        FieldKind::Text(TextOptions {
            autogenerate_pattern: autogenerate_pattern.to_string(),
            max: len,
            min: len,
            pattern: "^[a-z0-9]+$".to_string(),
            primary_key: true,
        }),
    )
    .with_required(true)
    .with_system(true)
}

fn logo(max_select: u32, max_size: u64) -> Field {
    Field::new(
        "file3834550803",
        "logo",
        FieldKind::File(FileOptions {
            max_select,
            max_size,
            mime_types: None,
            protected: false,
            thumbs: None,
        }),
    )
}

fn created_tenants() -> Migration {
    let tenants = with_fields(
        Collection::base(TENANTS_ID, "tenants"),
        vec![
            Field::text("text1579384326", "name").with_required(true),
            select("select2363381545", "type", 1, &["School", "Individual", "Enterprise"])
                .with_required(true),
            Field::text("text4145123130", "domain"),
            logo(1, 5_242_880),
            select("select2063623452", "status", 1, &["Active", "Inactive", "Pending"]),
            Field::email("email1874629670", "contact_email"),
            Field::text("text1146066909", "contact_phone"),
            Field::text("text223244161", "address"),
            json("json2992344663", "branding", 2_000_000),
            json("json3846545605", "settings", 2_000_000),
            Field::number("number1129580093", "max_users"),
            Field::number("number3011163498", "storage_quota"),
            select("select3447416185", "subscription_tier", 1, &["Free", "Basic", "Premium"]),
            select("select3053057214", "billing_cycle", 0, &["Monthly", "Yearly"]),
        ],
    )
    .with_rules(RuleSet {
        list_rule: Some("@request.auth.tenantId = id || @request.auth.role = \"Owner\"".into()),
        view_rule: Some("@request.auth.tenantId = id || @request.auth.role = \"Owner\"".into()),
        create_rule: Some("@request.auth.role = \"Owner\"".into()),
        update_rule: Some(
            "@request.auth.role = \"Owner\" || (@request.auth.role = \"SchoolAdmin\" && @request.auth.tenantId = id)"
                .into(),
        ),
        delete_rule: Some("@request.auth.role = \"Owner\"".into()),
    })
    .with_index("CREATE UNIQUE INDEX `idx_tenants_domain` ON `tenants` (`domain`) WHERE `domain` != ''");

    migration(
        1733900000,
        MigrationAction::Created,
        "tenants",
        vec![SchemaChange::CreateCollection { collection: tenants }],
        vec![SchemaChange::DeleteCollection {
            collection: TENANTS_ID.into(),
        }],
    )
}

fn created_users() -> Migration {
    let mut users = Collection::auth(USERS_COLLECTION_ID, "users");
    let before_autodates = users.fields.len().saturating_sub(2);
    let profile = [
        Field::text("text1579384326", "name"),
        Field::file("file376926767", "avatar"),
        select(
            "select1466534506",
            "role",
            1,
            &["Owner", "SchoolAdmin", "Teacher", "Student", "Parent", "Individual"],
        )
        .with_required(true),
        relation("relation3477451478", "tenantId", TENANTS_ID, false),
    ];
    for (offset, field) in profile.into_iter().enumerate() {
        users.fields.add_at(before_autodates + offset, field);
    }
    let users = users.with_rules(RuleSet {
        list_rule: Some(
            "id = @request.auth.id || (@request.auth.role = \"SchoolAdmin\" && tenantId = @request.auth.tenantId)"
                .into(),
        ),
        view_rule: Some(
            "id = @request.auth.id || (@request.auth.role = \"SchoolAdmin\" && tenantId = @request.auth.tenantId)"
                .into(),
        ),
        create_rule: Some(String::new()),
        update_rule: Some("id = @request.auth.id".into()),
        delete_rule: None,
    });

    migration(
        1733900100,
        MigrationAction::Created,
        "users",
        vec![SchemaChange::CreateCollection { collection: users }],
        vec![SchemaChange::DeleteCollection {
            collection: USERS_COLLECTION_ID.into(),
        }],
    )
}

const TENANT_SCOPED: &str = "@request.auth.id != \"\" && tenantId = @request.auth.tenantId";

fn schedule_field() -> Field {
    json("json1295596212", "schedule", 0)
}

fn created_classes() -> Migration {
    let classes = with_fields(
        Collection::base(CLASSES_ID, "classes"),
        vec![
            Field::text("text1579384326", "name").with_required(true),
            relation("relation3477451478", "tenantId", TENANTS_ID, true).with_required(true),
            relation("relation2968954581", "teacherId", USERS_COLLECTION_ID, false),
            Field::text("text3206337475", "subject"),
            schedule_field(),
            Field::text("text1308541430", "room"),
        ],
    )
    .with_rules(
        RuleSet::uniform(TENANT_SCOPED).with(
            RuleKind::Create,
            "@request.auth.id != \"\" && @request.body.tenantId = @request.auth.tenantId",
        ),
    )
    .with_index("CREATE INDEX `idx_classes_tenant` ON `classes` (`tenantId`)");

    migration(
        1733900200,
        MigrationAction::Created,
        "classes",
        vec![SchemaChange::CreateCollection { collection: classes }],
        vec![SchemaChange::DeleteCollection {
            collection: CLASSES_ID.into(),
        }],
    )
}

/// Shared by the migration that creates the collection and the reverse of
/// the one that deletes it.
fn wellness_entries() -> Collection {
    with_fields(
        Collection::base(WELLNESS_ENTRIES_ID, "wellness_entries"),
        vec![
            relation("relation2375276105", "user", USERS_COLLECTION_ID, true),
            Field::number("number1716930793", "mood"),
            Field::text("text2761467025", "entry"),
            Field::date("date2862495610", "date"),
        ],
    )
    .with_rules(RuleSet::uniform("@request.auth.id != \"\""))
}

fn created_wellness_entries() -> Migration {
    migration(
        1733900300,
        MigrationAction::Created,
        "wellness_entries",
        vec![SchemaChange::CreateCollection {
            collection: wellness_entries(),
        }],
        vec![SchemaChange::DeleteCollection {
            collection: WELLNESS_ENTRIES_ID.into(),
        }],
    )
}

fn initial_wellness_rules() -> RuleSet {
    RuleSet::uniform("@request.auth.id != \"\" && user = @request.auth.id").with(
        RuleKind::Create,
        "@request.auth.id != \"\" && @request.body.user = @request.auth.id",
    )
}

const WELLNESS_USER_INDEX: &str =
    "CREATE INDEX `idx_wellness_logs_user` ON `wellness_logs` (`user`)";

fn created_wellness_logs() -> Migration {
    let logs = with_fields(
        Collection::base(WELLNESS_LOGS_ID, "wellness_logs"),
        vec![
            relation("relation2375276105", "user", USERS_COLLECTION_ID, true).with_required(true),
            Field::date("date2862495610", "date").with_required(true),
            select(
                "select2490397029",
                "mood",
                1,
                &["Great", "Good", "Okay", "Low", "Bad"],
            ),
            Field::number("number3592130483", "sleep_hours"),
            Field::number("number1425391624", "water_glasses"),
            Field::text("text18589324", "notes"),
        ],
    )
    .with_rules(initial_wellness_rules())
    .with_index(WELLNESS_USER_INDEX);

    migration(
        1733900400,
        MigrationAction::Created,
        "wellness_logs",
        vec![SchemaChange::CreateCollection { collection: logs }],
        vec![SchemaChange::DeleteCollection {
            collection: WELLNESS_LOGS_ID.into(),
        }],
    )
}

/// Billing and plan limits for tenants, plus loosened constraints on seven
/// existing fields. The reverse restores the previous definitions.
fn updated_tenants_billing() -> Migration {
    let added = [
        (16, relation("relation2911524009", "admin_user", USERS_COLLECTION_ID, false)),
        (17, Field::text("text3252000302", "subdomain")),
        (18, select("select3713686397", "plan", 1, &["free", "basic", "pro", "enterprise"])),
        (
            19,
            select(
                "select3002498459",
                "subscription_status",
                1,
                &["active", "past_due", "cancelled", "trialing"],
            ),
        ),
        (20, Field::number("number3578592097", "max_students")),
        (21, Field::number("number2619500837", "max_teachers")),
        (22, Field::number("number945184987", "max_storage_gb")),
        (23, json("json966362225", "features_enabled", 0)),
        (24, Field::date("date746802699", "trial_ends_at")),
        (25, Field::date("date1549756988", "subscription_ends_at")),
        (26, Field::text("text1888339527", "stripe_customer_id")),
        (27, Field::text("text3051075425", "stripe_subscription_id")),
    ];

    let updated = [
        (0, tenant_id_field("text3208210256", "", 0)),
        (
            2,
            select("select2363381545", "type", 1, &["School", "Individual", "Business"])
                .with_required(true),
        ),
        (4, logo(0, 0)),
        (
            5,
            select(
                "select2063623452",
                "status",
                1,
                &["Active", "Suspended", "Trial", "Cancelled"],
            ),
        ),
        (9, json("json2992344663", "branding", 0)),
        (10, json("json3846545605", "settings", 0)),
        (14, select("select3053057214", "billing_cycle", 1, &["Monthly", "Yearly"])),
    ];

    let restored = [
        (0, tenant_id_field("text3208210256", "[a-z0-9]{15}", 15)),
        (
            2,
            select("select2363381545", "type", 1, &["School", "Individual", "Enterprise"])
                .with_required(true),
        ),
        (4, logo(1, 5_242_880)),
        (
            5,
            select("select2063623452", "status", 1, &["Active", "Inactive", "Pending"]),
        ),
        (9, json("json2992344663", "branding", 2_000_000)),
        (10, json("json3846545605", "settings", 2_000_000)),
        (14, select("select3053057214", "billing_cycle", 0, &["Monthly", "Yearly"])),
    ];

    let add = |(position, field): (usize, Field)| SchemaChange::AddField {
        collection: TENANTS_ID.into(),
        position: Some(position),
        field,
    };

    let mut down: Vec<SchemaChange> = added
        .iter()
        .map(|(_, field)| SchemaChange::RemoveField {
            collection: TENANTS_ID.into(),
            field_id: field.id.clone(),
        })
        .collect();
    down.extend(restored.into_iter().map(add));

    let up = added.into_iter().chain(updated).map(add).collect();

    migration(1764930416, MigrationAction::Updated, "tenants", up, down)
        .with_description("tenant billing, plan limits and subscription fields")
}

fn updated_wellness_logs_steps() -> Migration {
    migration(
        1764930500,
        MigrationAction::Updated,
        "wellness_logs",
        vec![
            SchemaChange::AddField {
                collection: WELLNESS_LOGS_ID.into(),
                position: Some(6),
                field: Field::number("number2134563254", "steps"),
            },
            SchemaChange::ReplaceIndexes {
                collection: WELLNESS_LOGS_ID.into(),
                indexes: vec![
                    WELLNESS_USER_INDEX.to_string(),
                    "CREATE UNIQUE INDEX `idx_wellness_logs_user_date` ON `wellness_logs` (`user`, `date`)"
                        .to_string(),
                ],
            },
        ],
        vec![
            SchemaChange::RemoveField {
                collection: WELLNESS_LOGS_ID.into(),
                field_id: "number2134563254".into(),
            },
            SchemaChange::ReplaceIndexes {
                collection: WELLNESS_LOGS_ID.into(),
                indexes: vec![WELLNESS_USER_INDEX.to_string()],
            },
        ],
    )
}

/// Owner-only access to wellness logs; any signed-in user may create.
fn updated_wellness_logs_rules() -> Migration {
    migration(
        1764931000,
        MigrationAction::Updated,
        "wellness_logs",
        vec![SchemaChange::ReplaceRules {
            collection: WELLNESS_LOGS_ID.into(),
            rules: RuleSet::uniform("@request.auth.id = user.id").with(RuleKind::Create, ""),
        }],
        vec![SchemaChange::ReplaceRules {
            collection: WELLNESS_LOGS_ID.into(),
            rules: initial_wellness_rules(),
        }],
    )
}

fn deleted_wellness_entries() -> Migration {
    migration(
        1764931200,
        MigrationAction::Deleted,
        "wellness_entries",
        vec![SchemaChange::DeleteCollection {
            collection: WELLNESS_ENTRIES_ID.into(),
        }],
        vec![SchemaChange::CreateCollection {
            collection: wellness_entries(),
        }],
    )
    .with_description("wellness_entries is superseded by wellness_logs")
}

fn updated_classes_schedule() -> Migration {
    migration(
        1764931300,
        MigrationAction::Updated,
        "classes",
        vec![SchemaChange::RemoveField {
            collection: CLASSES_ID.into(),
            field_id: "json1295596212".into(),
        }],
        vec![SchemaChange::AddField {
            collection: CLASSES_ID.into(),
            position: Some(5),
            field: schedule_field(),
        }],
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rule_expr::{EvalContext, allows};
    use schema_types::{FieldKind, InMemorySchemaStore, SchemaStore};
    use serde_json::json;

    use super::*;
    use crate::runner::Migrator;
    use crate::verify::verify;

    #[test]
    fn builtin_ids_are_unique_and_sorted() {
        let migrations = builtin();
        let set = builtin_set().expect("set");
        assert_eq!(set.len(), migrations.len());
        assert!(migrations.windows(2).all(|pair| pair[0].id < pair[1].id));
    }

    #[tokio::test]
    async fn builtin_history_verifies_clean() {
        let report = verify(&builtin()).await;
        assert!(report.is_clean(), "{:#?}", report.issues);
        assert_eq!(report.checked, builtin().len());
    }

    #[tokio::test]
    async fn full_history_yields_owner_only_wellness_logs() {
        let store = Arc::new(InMemorySchemaStore::new());
        let runner = Migrator::new(store.clone(), builtin_set().expect("set"));
        let report = runner.up(None).await.expect("up");
        assert_eq!(report.applied.len(), builtin().len());

        let logs = store.get("wellness_logs").expect("wellness_logs");
        for kind in [RuleKind::List, RuleKind::View, RuleKind::Update, RuleKind::Delete] {
            assert_eq!(logs.rules.get(kind), Some("@request.auth.id = user.id"));
        }
        assert_eq!(logs.rules.get(RuleKind::Create), Some(""));
        assert!(store.get("wellness_entries").is_none());

        let owner = json!({ "auth": { "id": "u1" } });
        let stranger = json!({ "auth": { "id": "u2" } });
        let record = json!({ "user": "u1", "mood": "Good" });
        let view = logs.rules.get(RuleKind::View);
        let allowed = |request: &serde_json::Value| {
            allows(
                view,
                &EvalContext {
                    request,
                    record: &record,
                },
                false,
            )
            .expect("evaluate")
        };
        assert!(allowed(&owner));
        assert!(!allowed(&stranger));
    }

    #[tokio::test]
    async fn tenant_billing_fields_land_at_their_positions() {
        let store = Arc::new(InMemorySchemaStore::new());
        Migrator::new(store.clone(), builtin_set().expect("set"))
            .up(None)
            .await
            .expect("up");

        let tenants = store.get(TENANTS_ID).expect("tenants");
        assert_eq!(tenants.fields.position_of("relation2911524009"), Some(16));
        assert_eq!(tenants.fields.position_of("text3051075425"), Some(27));
        let kind = &tenants.fields.get_by_name("type").expect("type").kind;
        assert!(matches!(kind, FieldKind::Select(o) if o.values.contains(&"Business".to_string())));
        let FieldKind::Text(id) = &tenants.fields.get_by_name("id").expect("id").kind else {
            panic!("id is text");
        };
        assert!(id.autogenerate_pattern.is_empty());
    }

    #[tokio::test]
    async fn reverting_billing_restores_previous_tenants() {
        let store = Arc::new(InMemorySchemaStore::new());
        let all = builtin_set().expect("set");
        let before_billing = MigrationSet::new(builtin().into_iter().take(5).collect()).expect("set");
        Migrator::new(store.clone(), before_billing)
            .up(None)
            .await
            .expect("up");
        let original = store.get(TENANTS_ID).expect("tenants");

        let runner = Migrator::new(store.clone(), all);
        runner.up(Some(1)).await.expect("billing");
        assert_ne!(store.get(TENANTS_ID).expect("tenants"), original);
        runner.down(1).await.expect("down");
        assert_eq!(store.get(TENANTS_ID).expect("tenants"), original);
    }

    #[tokio::test]
    async fn full_history_reverts_to_empty() {
        let store = Arc::new(InMemorySchemaStore::new());
        let runner = Migrator::new(store.clone(), builtin_set().expect("set"));
        runner.up(None).await.expect("up");
        runner.down(usize::MAX).await.expect("down");
        assert!(store.is_empty());
        assert!(store.applied_migrations().await.expect("ledger").is_empty());
    }
}
