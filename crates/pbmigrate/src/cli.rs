use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use config::MigratorConfig;
use migrations::MigrationAction;

#[derive(Parser, Debug)]
#[command(name = "pbmigrate", version, about = "Schema migrations for the school platform backend")]
pub struct Cli {
    /// Config file; defaults to `<config dir>/pbmigrate/config.json`.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// SQLite schema database.
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Directory of `<timestamp>_<action>_<collection>.json` migration files.
    #[arg(long, global = true)]
    pub migrations_dir: Option<PathBuf>,

    /// Only use migration files, not the compiled-in history.
    #[arg(long, global = true)]
    pub no_builtin: bool,

    #[arg(long, global = true)]
    pub allow_checksum_drift: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn apply_to(&self, config: &mut MigratorConfig) {
        if let Some(path) = &self.database {
            config.database_path = path.clone();
        }
        if let Some(dir) = &self.migrations_dir {
            config.migrations_dir = dir.clone();
        }
        if self.no_builtin {
            config.include_builtin = false;
        }
        if self.allow_checksum_drift {
            config.allow_checksum_drift = true;
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Apply pending migrations in order.
    Up {
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        dry_run: bool,
    },
    /// Revert the most recently applied migrations.
    Down {
        #[arg(long, default_value_t = 1)]
        steps: usize,
        #[arg(long)]
        dry_run: bool,
    },
    /// List applied, pending and orphaned migrations.
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Replay every migration from an empty schema and check reversibility.
    Verify,
    /// Check the rules of every collection in the schema database.
    Lint,
    /// Write the current schema as JSON.
    Export { file: PathBuf },
    /// Create an empty migration file.
    New {
        action: ActionArg,
        collection: String,
    },
    /// Talk to a running backend.
    Remote {
        /// Overrides the configured backend url.
        #[arg(long)]
        url: Option<String>,
        #[command(subcommand)]
        action: RemoteAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum RemoteAction {
    /// Show one collection, or a summary of all of them.
    Inspect { collection: Option<String> },
    /// Fetch one page of records.
    Records {
        collection: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 30)]
        per_page: u32,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        sort: Option<String>,
    },
    /// Back up live rules, then apply a `{collections: [{name, rules}]}` file.
    ApplyRules {
        file: PathBuf,
        #[arg(long, default_value = "pocketbase")]
        backup_dir: PathBuf,
        /// Only report collections whose rules differ.
        #[arg(long)]
        check: bool,
    },
    /// Save every remote collection definition as JSON.
    Pull { file: PathBuf },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ActionArg {
    Created,
    Updated,
    Deleted,
}

impl From<ActionArg> for MigrationAction {
    fn from(value: ActionArg) -> Self {
        match value {
            ActionArg::Created => MigrationAction::Created,
            ActionArg::Updated => MigrationAction::Updated,
            ActionArg::Deleted => MigrationAction::Deleted,
        }
    }
}
