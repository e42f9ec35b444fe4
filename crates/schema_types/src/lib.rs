pub mod collection;
pub mod field;
pub mod memory;
pub mod store;

use thiserror::Error;

pub use collection::{
    Collection, CollectionId, CollectionType, RuleKind, RuleSet, USERS_COLLECTION_ID,
};
pub use field::{
    AutodateOptions, DateOptions, EmailOptions, Field, FieldId, FieldKind, FieldList,
    FileOptions, JsonOptions, NumberOptions, PasswordOptions, RelationOptions, SelectOptions,
    TextOptions,
};
pub use memory::InMemorySchemaStore;
pub use store::{AppliedMigration, ChangeSet, SchemaStore, find_collection, validate_schema};

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("collection `{0}` not found")]
    CollectionNotFound(String),
    #[error("field `{field}` not found in collection `{collection}`")]
    FieldNotFound { collection: String, field: String },
    #[error("collection `{0}` already exists")]
    AlreadyExists(String),
    #[error("collection `{collection}` is invalid: {reason}")]
    Invalid { collection: String, reason: String },
}

impl SchemaError {
    /// True for lookup failures, which halt a migration batch.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchemaError::CollectionNotFound(_) | SchemaError::FieldNotFound { .. }
        )
    }
}
