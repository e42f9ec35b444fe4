use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::collection::{Collection, CollectionId};
use crate::store::{AppliedMigration, ChangeSet, SchemaStore};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    collections: IndexMap<CollectionId, Collection>,
    ledger: Vec<AppliedMigration>,
}

/// Schema store held entirely in memory. Used for dry runs, staging a
/// single migration before it is committed elsewhere, and tests.
#[derive(Debug, Default)]
pub struct InMemorySchemaStore {
    state: RwLock<MemoryState>,
}

impl InMemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(collections: Vec<Collection>, ledger: Vec<AppliedMigration>) -> Self {
        Self {
            state: RwLock::new(MemoryState {
                collections: collections.into_iter().map(|c| (c.id.clone(), c)).collect(),
                ledger,
            }),
        }
    }

    /// Copies the current schema and ledger out of any store.
    pub async fn fork_from(store: &dyn SchemaStore) -> Result<Self> {
        let collections = store.list_collections().await?;
        let ledger = store.applied_migrations().await?;
        Ok(Self::from_parts(collections, ledger))
    }

    pub fn snapshot(&self) -> Vec<Collection> {
        self.state.read().collections.values().cloned().collect()
    }

    pub fn get(&self, name_or_id: &str) -> Option<Collection> {
        let state = self.state.read();
        state
            .collections
            .get(name_or_id)
            .or_else(|| state.collections.values().find(|c| c.matches(name_or_id)))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.state.read().collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().collections.is_empty()
    }
}

impl Clone for InMemorySchemaStore {
    fn clone(&self) -> Self {
        Self {
            state: RwLock::new(self.state.read().clone()),
        }
    }
}

#[async_trait]
impl SchemaStore for InMemorySchemaStore {
    async fn list_collections(&self) -> Result<Vec<Collection>> {
        Ok(self.snapshot())
    }

    async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        Ok(self.state.read().ledger.clone())
    }

    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut state = self.state.write();
        let mut collections = state.collections.clone();
        changes.apply_to(&mut collections)?;
        state.collections = collections;
        changes.apply_ledger(&mut state.ledger);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::SchemaError;
    use crate::field::Field;

    #[tokio::test]
    async fn failed_commit_leaves_state_untouched() {
        let store = InMemorySchemaStore::new();
        store
            .save_collection(Collection::base("pbc_1", "tenants"))
            .await
            .expect("save");

        let bad = ChangeSet::new()
            .save(Collection::base("pbc_2", "classes"))
            .save(Collection::base("pbc_3", "rooms").with_field(Field::relation(
                "relation1",
                "class",
                "pbc_404",
            )));
        assert!(store.commit(bad).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn commit_updates_ledger() {
        let store = InMemorySchemaStore::new();
        let batch = Uuid::new_v4();
        store
            .commit(ChangeSet::new().record_applied(AppliedMigration {
                id: "1700000000_created_tenants".to_string(),
                checksum: "abc".to_string(),
                batch,
                applied_at: Utc::now(),
            }))
            .await
            .expect("apply");
        assert_eq!(store.applied_migrations().await.expect("ledger").len(), 1);

        store
            .commit(ChangeSet::new().record_reverted("1700000000_created_tenants"))
            .await
            .expect("revert");
        assert!(store.applied_migrations().await.expect("ledger").is_empty());
    }

    #[tokio::test]
    async fn lookup_failure_is_a_schema_error() {
        let store = InMemorySchemaStore::new();
        let err = store
            .find_collection_by_name_or_id("pbc_926415452")
            .await
            .expect_err("missing");
        let schema_err = err.downcast_ref::<SchemaError>().expect("schema error");
        assert!(schema_err.is_not_found());
    }
}
