use anyhow::Result;
use schema_types::SchemaStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::change::SchemaChange;
use crate::id::MigrationId;

/// A forward/reverse pair of schema mutations. `down` must restore exactly
/// what `up` touched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub id: MigrationId,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub up: Vec<SchemaChange>,
    pub down: Vec<SchemaChange>,
}

/// On-disk body of a migration file; the id comes from the file name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationFile {
    #[serde(default)]
    pub description: String,
    pub up: Vec<SchemaChange>,
    pub down: Vec<SchemaChange>,
}

impl Migration {
    pub fn new(id: MigrationId, up: Vec<SchemaChange>, down: Vec<SchemaChange>) -> Self {
        Self {
            id,
            description: String::new(),
            up,
            down,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn from_file(id: MigrationId, file: MigrationFile) -> Self {
        Self {
            id,
            description: file.description,
            up: file.up,
            down: file.down,
        }
    }

    pub fn to_file(&self) -> MigrationFile {
        MigrationFile {
            description: self.description.clone(),
            up: self.up.clone(),
            down: self.down.clone(),
        }
    }

    /// SHA-256 over the canonical JSON of both directions.
    pub fn checksum(&self) -> String {
        let body = serde_json::json!({ "up": self.up, "down": self.down });
        let digest = Sha256::digest(body.to_string().as_bytes());
        format!("{digest:x}")
    }

    pub async fn apply_up(&self, store: &dyn SchemaStore) -> Result<()> {
        apply_all(&self.up, store).await
    }

    pub async fn apply_down(&self, store: &dyn SchemaStore) -> Result<()> {
        apply_all(&self.down, store).await
    }

    /// Ids or names of every collection either direction touches.
    pub fn targets(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for change in self.up.iter().chain(self.down.iter()) {
            if !out.contains(&change.target()) {
                out.push(change.target());
            }
        }
        out
    }
}

async fn apply_all(changes: &[SchemaChange], store: &dyn SchemaStore) -> Result<()> {
    for change in changes {
        change.apply(store).await?;
    }
    Ok(())
}
