use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SchemaError;
use crate::collection::{Collection, CollectionId};

/// Ledger row for a migration that has been applied to a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub id: String,
    pub checksum: String,
    pub batch: Uuid,
    pub applied_at: DateTime<Utc>,
}

/// Collection writes and ledger updates that a store applies as one unit.
/// Deletions are applied before saves.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub saved: Vec<Collection>,
    pub deleted: Vec<CollectionId>,
    pub applied: Vec<AppliedMigration>,
    pub reverted: Vec<String>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(mut self, collection: Collection) -> Self {
        self.saved.push(collection);
        self
    }

    pub fn delete(mut self, id: impl Into<CollectionId>) -> Self {
        self.deleted.push(id.into());
        self
    }

    pub fn record_applied(mut self, applied: AppliedMigration) -> Self {
        self.applied.push(applied);
        self
    }

    pub fn record_reverted(mut self, id: impl Into<String>) -> Self {
        self.reverted.push(id.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
            && self.deleted.is_empty()
            && self.applied.is_empty()
            && self.reverted.is_empty()
    }

    /// Applies the collection part to `collections` and validates the
    /// resulting schema as a whole. On error `collections` may be partially
    /// modified, so callers apply to a scratch copy first.
    pub fn apply_to(
        &self,
        collections: &mut IndexMap<CollectionId, Collection>,
    ) -> Result<(), SchemaError> {
        for id in &self.deleted {
            if collections.shift_remove(id).is_none() {
                return Err(SchemaError::CollectionNotFound(id.clone()));
            }
        }
        for collection in &self.saved {
            collections.insert(collection.id.clone(), collection.clone());
        }
        validate_schema(collections.values())
    }

    pub fn apply_ledger(&self, ledger: &mut Vec<AppliedMigration>) {
        ledger.retain(|entry| !self.reverted.contains(&entry.id));
        ledger.extend(self.applied.iter().cloned());
    }
}

/// Cross-collection checks: per-collection validity, unique names, and
/// relation targets that exist.
pub fn validate_schema<'a>(
    collections: impl IntoIterator<Item = &'a Collection>,
) -> Result<(), SchemaError> {
    let collections: Vec<&Collection> = collections.into_iter().collect();
    let ids: HashSet<&str> = collections.iter().map(|c| c.id.as_str()).collect();
    let mut names = HashSet::new();

    for collection in &collections {
        collection.validate()?;
        if !names.insert(collection.name.to_ascii_lowercase()) {
            return Err(SchemaError::AlreadyExists(collection.name.clone()));
        }
        for field in &collection.fields {
            if let Some(target) = field.relation_target() {
                if !ids.contains(target) {
                    return Err(SchemaError::Invalid {
                        collection: collection.name.clone(),
                        reason: format!(
                            "relation field `{}` targets unknown collection `{target}`",
                            field.name
                        ),
                    });
                }
            }
        }
    }
    Ok(())
}

pub fn find_collection(collections: &[Collection], name_or_id: &str) -> Result<Collection, SchemaError> {
    collections
        .iter()
        .find(|c| c.id == name_or_id)
        .or_else(|| collections.iter().find(|c| c.matches(name_or_id)))
        .cloned()
        .ok_or_else(|| SchemaError::CollectionNotFound(name_or_id.to_string()))
}

#[async_trait]
pub trait SchemaStore: Send + Sync {
    async fn list_collections(&self) -> Result<Vec<Collection>>;

    async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>>;

    async fn commit(&self, changes: ChangeSet) -> Result<()>;

    async fn find_collection_by_name_or_id(&self, name_or_id: &str) -> Result<Collection> {
        let collections = self.list_collections().await?;
        Ok(find_collection(&collections, name_or_id)?)
    }

    async fn save_collection(&self, collection: Collection) -> Result<()> {
        self.commit(ChangeSet::new().save(collection)).await
    }

    async fn delete_collection(&self, name_or_id: &str) -> Result<()> {
        let collection = self.find_collection_by_name_or_id(name_or_id).await?;
        self.commit(ChangeSet::new().delete(collection.id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::Field;

    fn schema(collections: Vec<Collection>) -> IndexMap<CollectionId, Collection> {
        collections.into_iter().map(|c| (c.id.clone(), c)).collect()
    }

    #[test]
    fn rejects_relation_to_missing_collection() {
        let mut collections = schema(vec![]);
        let changes = ChangeSet::new().save(
            Collection::base("pbc_1", "classes").with_field(Field::relation(
                "relation1",
                "teacher",
                "pbc_missing",
            )),
        );
        let err = changes.apply_to(&mut collections).expect_err("dangling relation");
        assert!(err.to_string().contains("pbc_missing"));
    }

    #[test]
    fn deleting_a_referenced_collection_is_invalid() {
        let mut collections = schema(vec![
            Collection::base("pbc_1", "tenants"),
            Collection::base("pbc_2", "classes").with_field(Field::relation(
                "relation1",
                "tenant",
                "pbc_1",
            )),
        ]);
        let err = ChangeSet::new()
            .delete("pbc_1")
            .apply_to(&mut collections)
            .expect_err("still referenced");
        assert!(matches!(err, SchemaError::Invalid { .. }));
    }

    #[test]
    fn rejects_duplicate_names_across_collections() {
        let mut collections = schema(vec![Collection::base("pbc_1", "tenants")]);
        let err = ChangeSet::new()
            .save(Collection::base("pbc_2", "Tenants"))
            .apply_to(&mut collections)
            .expect_err("duplicate");
        assert!(matches!(err, SchemaError::AlreadyExists(_)));
    }

    #[test]
    fn find_prefers_exact_id_over_name() {
        let collections = vec![
            Collection::base("users_archive", "archive"),
            Collection::base("pbc_9", "users_archive"),
        ];
        let found = find_collection(&collections, "users_archive").expect("found");
        assert_eq!(found.name, "archive");

        let err = find_collection(&collections, "nope").expect_err("missing");
        assert!(err.is_not_found());
    }
}
