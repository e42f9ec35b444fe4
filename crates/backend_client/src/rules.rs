use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rule_expr::{RuleError, classify};
use schema_types::{RuleKind, RuleSet};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::{RemoteCollection, is_not_found};

/// The parts of the backend the rule tooling needs.
#[async_trait]
pub trait RulesBackend: Send + Sync {
    async fn get_collection(&self, name_or_id: &str) -> Result<RemoteCollection>;

    async fn list_collections(&self) -> Result<Vec<RemoteCollection>>;

    async fn update_rules(&self, collection_id: &str, rules: &RuleSet) -> Result<()>;
}

/// `{"collections": [{"name": ..., "rules": {...}}]}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesDocument {
    pub collections: Vec<CollectionRules>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRules {
    pub name: String,
    pub rules: RuleSet,
}

/// One line of a rules backup file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBackupEntry {
    pub name: String,
    #[serde(flatten)]
    pub rules: RuleSet,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplySummary {
    pub applied: Vec<String>,
    /// Collections that do not exist on the backend.
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl ApplySummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl RulesDocument {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse rules document {}", path.display()))
    }

    /// Every rule that does not parse.
    pub fn syntax_errors(&self) -> Vec<(String, RuleKind, RuleError)> {
        let mut out = Vec::new();
        for entry in &self.collections {
            for (kind, rule) in entry.rules.iter() {
                if let Err(err) = classify(rule) {
                    out.push((entry.name.clone(), kind, err));
                }
            }
        }
        out
    }
}

pub fn backup_entries(collections: &[RemoteCollection]) -> Vec<RuleBackupEntry> {
    collections
        .iter()
        .map(|c| RuleBackupEntry {
            name: c.name.clone(),
            rules: c.rules.clone(),
        })
        .collect()
}

/// Writes `rules-backup-<unix-millis>.json` into `dir`.
pub fn write_backup(dir: impl AsRef<Path>, entries: &[RuleBackupEntry]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(format!("rules-backup-{}.json", Utc::now().timestamp_millis()));
    let text = serde_json::to_string_pretty(entries).context("failed to serialize backup")?;
    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), collections = entries.len(), "saved rules backup");
    Ok(path)
}

/// Applies each entry of `document`. Missing collections are skipped and
/// other failures are collected; neither stops the remaining entries.
pub async fn apply_rules(backend: &dyn RulesBackend, document: &RulesDocument) -> ApplySummary {
    let mut summary = ApplySummary::default();
    for entry in &document.collections {
        let collection = match backend.get_collection(&entry.name).await {
            Ok(collection) => collection,
            Err(err) if is_not_found(&err) => {
                warn!(collection = %entry.name, "collection not found, skipping");
                summary.skipped.push(entry.name.clone());
                continue;
            }
            Err(err) => {
                error!(collection = %entry.name, error = %format!("{err:#}"), "failed to load collection");
                summary.failed.push((entry.name.clone(), format!("{err:#}")));
                continue;
            }
        };

        match backend.update_rules(&collection.id, &entry.rules).await {
            Ok(()) => {
                info!(collection = %entry.name, "applied rules");
                summary.applied.push(entry.name.clone());
            }
            Err(err) => {
                error!(collection = %entry.name, error = %format!("{err:#}"), "failed to apply rules");
                summary.failed.push((entry.name.clone(), format!("{err:#}")));
            }
        }
    }
    summary
}

/// Names of collections whose live rules differ from `document`. Missing
/// collections are ignored.
pub async fn mismatched_rules(
    backend: &dyn RulesBackend,
    document: &RulesDocument,
) -> Result<Vec<String>> {
    let mut mismatched = Vec::new();
    for entry in &document.collections {
        match backend.get_collection(&entry.name).await {
            Ok(collection) if collection.rules != entry.rules => {
                mismatched.push(entry.name.clone())
            }
            Ok(_) => {}
            Err(err) if is_not_found(&err) => {}
            Err(err) => return Err(err),
        }
    }
    Ok(mismatched)
}
