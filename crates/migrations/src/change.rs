use anyhow::{Context, Result};
use schema_types::{
    Collection, Field, FieldId, RuleSet, SchemaError, SchemaStore, find_collection,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One mutation of the schema. Every variant except `create_collection`
/// looks its target up by id or name first; a failed lookup is fatal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateCollection {
        collection: Collection,
    },
    DeleteCollection {
        collection: String,
    },
    /// Inserts `field` at `position` (appends when absent), or updates it in
    /// place when a field with the same id already exists.
    AddField {
        collection: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
        field: Field,
    },
    RemoveField {
        collection: String,
        field_id: FieldId,
    },
    ReplaceRules {
        collection: String,
        rules: RuleSet,
    },
    ReplaceIndexes {
        collection: String,
        indexes: Vec<String>,
    },
}

impl SchemaChange {
    /// Id or name of the collection this change targets.
    pub fn target(&self) -> &str {
        match self {
            SchemaChange::CreateCollection { collection } => &collection.id,
            SchemaChange::DeleteCollection { collection }
            | SchemaChange::AddField { collection, .. }
            | SchemaChange::RemoveField { collection, .. }
            | SchemaChange::ReplaceRules { collection, .. }
            | SchemaChange::ReplaceIndexes { collection, .. } => collection,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SchemaChange::CreateCollection { .. } => "create_collection",
            SchemaChange::DeleteCollection { .. } => "delete_collection",
            SchemaChange::AddField { .. } => "add_field",
            SchemaChange::RemoveField { .. } => "remove_field",
            SchemaChange::ReplaceRules { .. } => "replace_rules",
            SchemaChange::ReplaceIndexes { .. } => "replace_indexes",
        }
    }

    pub async fn apply(&self, store: &dyn SchemaStore) -> Result<()> {
        debug!(op = self.kind(), target = self.target(), "applying schema change");
        match self {
            SchemaChange::CreateCollection { collection } => {
                let existing = store.list_collections().await?;
                if let Some(clash) = existing
                    .iter()
                    .find(|c| c.id == collection.id || c.name.eq_ignore_ascii_case(&collection.name))
                {
                    return Err(SchemaError::AlreadyExists(clash.name.clone()).into());
                }
                store
                    .save_collection(collection.clone())
                    .await
                    .with_context(|| format!("failed to create collection `{}`", collection.name))
            }
            SchemaChange::DeleteCollection { collection } => {
                let target = lookup(store, collection).await?;
                store
                    .delete_collection(&target.id)
                    .await
                    .with_context(|| format!("failed to delete collection `{}`", target.name))
            }
            SchemaChange::AddField {
                collection,
                position,
                field,
            } => {
                let mut target = lookup(store, collection).await?;
                let pos = position.unwrap_or(target.fields.len());
                target.fields.add_at(pos, field.clone());
                save(store, target).await
            }
            SchemaChange::RemoveField {
                collection,
                field_id,
            } => {
                let mut target = lookup(store, collection).await?;
                if target.fields.remove_by_id(field_id).is_none() {
                    return Err(SchemaError::FieldNotFound {
                        collection: target.name.clone(),
                        field: field_id.clone(),
                    }
                    .into());
                }
                save(store, target).await
            }
            SchemaChange::ReplaceRules { collection, rules } => {
                let mut target = lookup(store, collection).await?;
                target.rules = rules.clone();
                save(store, target).await
            }
            SchemaChange::ReplaceIndexes {
                collection,
                indexes,
            } => {
                let mut target = lookup(store, collection).await?;
                target.indexes = indexes.clone();
                save(store, target).await
            }
        }
    }

    /// Resolves the target against an in-memory schema without touching a
    /// store, for read-only analysis.
    pub fn resolve_target<'a>(&self, collections: &'a [Collection]) -> Option<&'a Collection> {
        let target = self.target();
        collections
            .iter()
            .find(|c| c.id == target)
            .or_else(|| collections.iter().find(|c| c.matches(target)))
    }
}

async fn lookup(store: &dyn SchemaStore, name_or_id: &str) -> Result<Collection> {
    let collections = store.list_collections().await?;
    Ok(find_collection(&collections, name_or_id)?)
}

async fn save(store: &dyn SchemaStore, collection: Collection) -> Result<()> {
    let name = collection.name.clone();
    store
        .save_collection(collection)
        .await
        .with_context(|| format!("failed to save collection `{name}`"))
}

#[cfg(test)]
mod tests {
    use schema_types::{InMemorySchemaStore, RuleKind};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn add_field_updates_in_place_and_remove_reverses_insert() {
        let store = InMemorySchemaStore::new();
        SchemaChange::CreateCollection {
            collection: Collection::base("pbc_1", "notes").with_field(Field::text("text1", "title")),
        }
        .apply(&store)
        .await
        .expect("create");

        SchemaChange::AddField {
            collection: "notes".into(),
            position: Some(1),
            field: Field::boolean("bool1", "pinned"),
        }
        .apply(&store)
        .await
        .expect("add");
        SchemaChange::AddField {
            collection: "pbc_1".into(),
            position: Some(0),
            field: Field::text("text1", "title").with_required(true),
        }
        .apply(&store)
        .await
        .expect("update");

        let notes = store.get("notes").expect("notes");
        assert_eq!(notes.fields.position_of("bool1"), Some(1));
        assert!(notes.fields.get_by_id("text1").expect("title").required);

        SchemaChange::RemoveField {
            collection: "notes".into(),
            field_id: "bool1".into(),
        }
        .apply(&store)
        .await
        .expect("remove");
        assert!(store.get("notes").expect("notes").fields.get_by_id("bool1").is_none());
    }

    #[tokio::test]
    async fn unknown_collection_is_fatal() {
        let store = InMemorySchemaStore::new();
        let err = SchemaChange::ReplaceRules {
            collection: "pbc_926415452".into(),
            rules: RuleSet::uniform("@request.auth.id = user.id"),
        }
        .apply(&store)
        .await
        .expect_err("missing collection");
        let schema_err = err.downcast_ref::<SchemaError>().expect("schema error");
        assert!(schema_err.is_not_found());
    }

    #[tokio::test]
    async fn removing_missing_field_is_fatal() {
        let store = InMemorySchemaStore::new();
        store
            .save_collection(Collection::base("pbc_1", "notes"))
            .await
            .expect("save");
        let err = SchemaChange::RemoveField {
            collection: "notes".into(),
            field_id: "text404".into(),
        }
        .apply(&store)
        .await
        .expect_err("missing field");
        assert!(matches!(
            err.downcast_ref::<SchemaError>(),
            Some(SchemaError::FieldNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn create_rejects_existing_name() {
        let store = InMemorySchemaStore::new();
        store
            .save_collection(Collection::base("pbc_1", "notes"))
            .await
            .expect("save");
        let err = SchemaChange::CreateCollection {
            collection: Collection::base("pbc_2", "Notes"),
        }
        .apply(&store)
        .await
        .expect_err("clash");
        assert!(matches!(
            err.downcast_ref::<SchemaError>(),
            Some(SchemaError::AlreadyExists(_))
        ));
    }

    #[test]
    fn serializes_with_op_tag() {
        let change = SchemaChange::ReplaceRules {
            collection: "wellness_logs".into(),
            rules: RuleSet::uniform("@request.auth.id = user.id").with(RuleKind::Create, ""),
        };
        let value = serde_json::to_value(&change).expect("value");
        assert_eq!(value["op"], "replace_rules");
        assert_eq!(value["rules"]["createRule"], json!(""));
        let back: SchemaChange = serde_json::from_value(value).expect("back");
        assert_eq!(back, change);
    }
}
