use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use schema_types::{AppliedMigration, ChangeSet, Collection, InMemorySchemaStore, SchemaStore};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::MigrationError;
use crate::id::MigrationId;
use crate::lint::{Severity, lint_collection};
use crate::migration::Migration;
use crate::set::MigrationSet;

#[derive(Debug, Clone, Copy, Default)]
pub struct MigratorOptions {
    /// Stage everything against a copy of the store and commit nothing.
    pub dry_run: bool,
    /// Warn instead of failing when an applied migration was edited.
    pub allow_checksum_drift: bool,
    /// Treat rule syntax errors introduced by a migration as failures.
    pub validate_rules: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub dry_run: bool,
    pub batch: Option<Uuid>,
    pub applied: Vec<String>,
    pub reverted: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Applied,
    Pending,
    /// Recorded in the ledger but absent from the migration set.
    Orphaned,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub id: String,
    pub status: MigrationStatus,
    pub applied_at: Option<DateTime<Utc>>,
    pub batch: Option<Uuid>,
    pub checksum_ok: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatusReport {
    pub entries: Vec<StatusEntry>,
}

impl StatusReport {
    pub fn count(&self, status: MigrationStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    pub fn drifted(&self) -> impl Iterator<Item = &StatusEntry> {
        self.entries
            .iter()
            .filter(|e| e.status == MigrationStatus::Applied && !e.checksum_ok)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

/// Applies and reverts a [`MigrationSet`] against a store, one migration at
/// a time. Each migration is staged on an in-memory copy and committed
/// together with its ledger row, so a failure leaves no partial change.
pub struct Migrator {
    store: Arc<dyn SchemaStore>,
    set: MigrationSet,
    options: MigratorOptions,
}

impl Migrator {
    pub fn new(store: Arc<dyn SchemaStore>, set: MigrationSet) -> Self {
        Self {
            store,
            set,
            options: MigratorOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MigratorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set(&self) -> &MigrationSet {
        &self.set
    }

    /// Applies pending migrations in ascending order, at most `limit`.
    /// Halts at the first failure; migrations committed before it stay.
    pub async fn up(&self, limit: Option<usize>) -> Result<RunReport> {
        let target = self.target().await?;
        let ledger = target.applied_migrations().await?;
        let mut report = RunReport {
            dry_run: self.options.dry_run,
            ..RunReport::default()
        };

        self.check_drift(&ledger, &mut report)?;

        let applied: HashMap<&str, &AppliedMigration> =
            ledger.iter().map(|entry| (entry.id.as_str(), entry)).collect();
        let newest_applied = ledger
            .iter()
            .filter_map(|entry| entry.id.parse::<MigrationId>().ok())
            .max();
        let pending: Vec<&Migration> = self
            .set
            .iter()
            .filter(|m| !applied.contains_key(m.id.to_string().as_str()))
            .take(limit.unwrap_or(usize::MAX))
            .collect();

        if pending.is_empty() {
            info!("no pending migrations");
            return Ok(report);
        }

        let batch = Uuid::new_v4();
        report.batch = Some(batch);
        for migration in pending {
            let id = migration.id.to_string();
            if newest_applied.as_ref().is_some_and(|newest| &migration.id < newest) {
                warn!(%id, "applying migration older than the newest applied one");
                report
                    .warnings
                    .push(format!("`{id}` is older than the newest applied migration"));
            }

            let changes = self
                .stage(target.as_ref(), migration, Direction::Up, &mut report)
                .await?;
            let record = AppliedMigration {
                id: id.clone(),
                checksum: migration.checksum(),
                batch,
                applied_at: Utc::now(),
            };
            target
                .commit(changes.record_applied(record))
                .await
                .map_err(|cause| MigrationError::Failed {
                    id: id.clone(),
                    cause,
                })?;

            info!(%id, %batch, dry_run = self.options.dry_run, "applied migration");
            report.applied.push(id);
        }
        Ok(report)
    }

    /// Reverts the `steps` most recently applied migrations, newest first.
    pub async fn down(&self, steps: usize) -> Result<RunReport> {
        let target = self.target().await?;
        let mut ledger = target.applied_migrations().await?;
        ledger.sort_by(|a, b| {
            b.applied_at
                .cmp(&a.applied_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let mut report = RunReport {
            dry_run: self.options.dry_run,
            ..RunReport::default()
        };
        if ledger.is_empty() {
            info!("no applied migrations to revert");
            return Ok(report);
        }

        for entry in ledger.iter().take(steps) {
            let migration = self
                .set
                .get(&entry.id)
                .ok_or_else(|| MigrationError::UnknownApplied(entry.id.clone()))?;

            let changes = self
                .stage(target.as_ref(), migration, Direction::Down, &mut report)
                .await?;
            target
                .commit(changes.record_reverted(entry.id.clone()))
                .await
                .map_err(|cause| MigrationError::Failed {
                    id: entry.id.clone(),
                    cause,
                })?;

            info!(id = %entry.id, dry_run = self.options.dry_run, "reverted migration");
            report.reverted.push(entry.id.clone());
        }
        Ok(report)
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let ledger = self.store.applied_migrations().await?;
        let applied: HashMap<&str, &AppliedMigration> =
            ledger.iter().map(|entry| (entry.id.as_str(), entry)).collect();

        let mut entries: Vec<StatusEntry> = self
            .set
            .iter()
            .map(|migration| {
                let id = migration.id.to_string();
                match applied.get(id.as_str()) {
                    Some(entry) => StatusEntry {
                        checksum_ok: entry.checksum == migration.checksum(),
                        status: MigrationStatus::Applied,
                        applied_at: Some(entry.applied_at),
                        batch: Some(entry.batch),
                        id,
                    },
                    None => StatusEntry {
                        id,
                        status: MigrationStatus::Pending,
                        applied_at: None,
                        batch: None,
                        checksum_ok: true,
                    },
                }
            })
            .collect();

        for entry in &ledger {
            if self.set.get(&entry.id).is_none() {
                entries.push(StatusEntry {
                    id: entry.id.clone(),
                    status: MigrationStatus::Orphaned,
                    applied_at: Some(entry.applied_at),
                    batch: Some(entry.batch),
                    checksum_ok: false,
                });
            }
        }
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(StatusReport { entries })
    }

    async fn target(&self) -> Result<Arc<dyn SchemaStore>> {
        if self.options.dry_run {
            let fork = InMemorySchemaStore::fork_from(self.store.as_ref()).await?;
            Ok(Arc::new(fork))
        } else {
            Ok(Arc::clone(&self.store))
        }
    }

    fn check_drift(&self, ledger: &[AppliedMigration], report: &mut RunReport) -> Result<()> {
        for entry in ledger {
            let Some(migration) = self.set.get(&entry.id) else {
                warn!(id = %entry.id, "applied migration is missing from the migration set");
                continue;
            };
            let current = migration.checksum();
            if current == entry.checksum {
                continue;
            }
            if !self.options.allow_checksum_drift {
                return Err(MigrationError::ChecksumMismatch {
                    id: entry.id.clone(),
                    recorded: entry.checksum.clone(),
                    current,
                }
                .into());
            }
            warn!(id = %entry.id, "applied migration was edited, continuing");
            report
                .warnings
                .push(format!("{}: checksum drift", entry.id));
        }
        Ok(())
    }

    /// Runs one direction of `migration` on a scratch copy of `target` and
    /// returns the collection writes it produced.
    async fn stage(
        &self,
        target: &dyn SchemaStore,
        migration: &Migration,
        direction: Direction,
        report: &mut RunReport,
    ) -> Result<ChangeSet> {
        let id = migration.id.to_string();
        let failed = |cause| MigrationError::Failed {
            id: id.clone(),
            cause,
        };

        let scratch = InMemorySchemaStore::fork_from(target).await?;
        let before = scratch.snapshot();
        let result = match direction {
            Direction::Up => migration.apply_up(&scratch).await,
            Direction::Down => migration.apply_down(&scratch).await,
        };
        result.map_err(failed)?;

        let changes = diff(&before, &scratch.snapshot());
        if matches!(direction, Direction::Up) {
            self.check_rules(&id, &changes.saved, report)?;
        }
        Ok(changes)
    }

    fn check_rules(&self, id: &str, saved: &[Collection], report: &mut RunReport) -> Result<()> {
        for collection in saved {
            for issue in lint_collection(collection) {
                if issue.severity == Severity::Error && self.options.validate_rules {
                    if let Some(error) = issue.syntax {
                        return Err(MigrationError::InvalidRule {
                            id: id.to_string(),
                            collection: issue.collection,
                            rule: issue.rule,
                            error,
                        }
                        .into());
                    }
                }
                warn!(migration = id, %issue, "rule issue");
                report.warnings.push(format!("{id}: {issue}"));
            }
        }
        Ok(())
    }
}

/// Collection-level difference between two schema snapshots.
pub(crate) fn diff(before: &[Collection], after: &[Collection]) -> ChangeSet {
    let previous: HashMap<&str, &Collection> =
        before.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut changes = ChangeSet::new();

    for collection in before {
        if !after.iter().any(|c| c.id == collection.id) {
            changes = changes.delete(collection.id.clone());
        }
    }
    for collection in after {
        if previous.get(collection.id.as_str()) != Some(&collection) {
            changes = changes.save(collection.clone());
        }
    }
    changes
}
