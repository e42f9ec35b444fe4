use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::MigrationError;
use crate::id::{MigrationAction, MigrationId};
use crate::migration::{Migration, MigrationFile};

/// Migrations sorted ascending by id, ids unique.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    migrations: Vec<Migration>,
}

impl MigrationSet {
    pub fn new(mut migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = migrations.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(MigrationError::Duplicate(pair[0].id.to_string()));
        }
        Ok(Self { migrations })
    }

    /// Adds more migrations, re-sorting and re-checking uniqueness.
    pub fn extend(self, more: Vec<Migration>) -> Result<Self, MigrationError> {
        let mut all = self.migrations;
        all.extend(more);
        Self::new(all)
    }

    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.id.to_string() == id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Migration> {
        self.migrations.iter()
    }

    pub fn as_slice(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Loads every `<id>.json` file in `dir`, sorted by id. A missing directory
/// yields no migrations.
pub fn load_dir(dir: impl AsRef<Path>) -> Result<Vec<Migration>> {
    let dir = dir.as_ref();
    if !dir.exists() {
        debug!(dir = %dir.display(), "migrations dir not found, nothing to load");
        return Ok(Vec::new());
    }

    let mut migrations = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .with_context(|| format!("non utf-8 migration file name {}", path.display()))?;
        let id: MigrationId = stem
            .parse()
            .with_context(|| format!("bad migration file name {}", path.display()))?;

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: MigrationFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse migration {}", path.display()))?;
        migrations.push(Migration::from_file(id, file));
    }

    migrations.sort_by(|a, b| a.id.cmp(&b.id));
    debug!(dir = %dir.display(), count = migrations.len(), "loaded migration files");
    Ok(migrations)
}

/// Writes a migration to `<dir>/<id>.json`.
pub fn write_file(dir: impl AsRef<Path>, migration: &Migration) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("{}.json", migration.id));
    let text = serde_json::to_string_pretty(&migration.to_file())
        .context("failed to serialize migration")?;
    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Creates an empty migration file stamped with the current time.
pub fn scaffold(
    dir: impl AsRef<Path>,
    action: MigrationAction,
    collection: &str,
) -> Result<PathBuf> {
    let timestamp = u64::try_from(chrono::Utc::now().timestamp()).context("clock before epoch")?;
    let id = format!("{timestamp}_{}_{collection}", action.as_str()).parse::<MigrationId>()?;
    let path = write_file(dir, &Migration::new(id, Vec::new(), Vec::new()))?;
    info!(path = %path.display(), "created migration file");
    Ok(path)
}
