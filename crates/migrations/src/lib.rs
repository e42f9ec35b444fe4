//! Timestamped schema migrations: ids, changes, loading, running and
//! verification against any [`SchemaStore`](schema_types::SchemaStore).

pub mod catalog;
pub mod change;
pub mod id;
pub mod lint;
pub mod migration;
pub mod runner;
pub mod set;
pub mod verify;

pub use change::SchemaChange;
pub use id::{MigrationAction, MigrationId};
pub use lint::{RuleIssue, Severity, lint_collection};
pub use migration::{Migration, MigrationFile};
pub use runner::{
    MigrationStatus, Migrator, MigratorOptions, RunReport, StatusEntry, StatusReport,
};
pub use set::{MigrationSet, load_dir, scaffold, write_file};
pub use verify::{VerifyIssue, VerifyReport, verify};

use rule_expr::RuleError;
use schema_types::{RuleKind, SchemaError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("invalid migration id `{0}`, expected <timestamp>_<created|updated|deleted>_<name>")]
    InvalidId(String),
    #[error("duplicate migration id `{0}`")]
    Duplicate(String),
    #[error("migration `{id}` failed: {cause:#}")]
    Failed { id: String, cause: anyhow::Error },
    #[error("migration `{id}` was edited after being applied (recorded {recorded}, now {current})")]
    ChecksumMismatch {
        id: String,
        recorded: String,
        current: String,
    },
    #[error("applied migration `{0}` is not in the migration set")]
    UnknownApplied(String),
    #[error("migration `{id}` leaves an invalid {rule} on `{collection}`: {error}")]
    InvalidRule {
        id: String,
        collection: String,
        rule: RuleKind,
        #[source]
        error: RuleError,
    },
}

impl MigrationError {
    /// True when a migration halted because its target collection or field
    /// could not be found.
    pub fn is_lookup_failure(&self) -> bool {
        match self {
            MigrationError::Failed { cause, .. } => cause
                .chain()
                .filter_map(|err| err.downcast_ref::<SchemaError>())
                .any(|err| err.is_not_found()),
            _ => false,
        }
    }
}
