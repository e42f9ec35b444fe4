use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use backend_client::rules::{apply_rules, backup_entries, mismatched_rules, write_backup};
use backend_client::{BackendClient, RecordQuery, RulesDocument};
use config::MigratorConfig;
use migrations::{
    MigrationSet, MigrationStatus, Migrator, MigratorOptions, RunReport, Severity, catalog,
    lint_collection, load_dir, scaffold, verify,
};
use schema_types::SchemaStore;
use storage_sqlite::SqliteSchemaStore;
use tracing::{info, warn};

use crate::cli::{Command, RemoteAction};

pub async fn run(command: Command, config: &MigratorConfig) -> Result<()> {
    match command {
        Command::Up { limit, dry_run } => {
            let report = migrator(config, dry_run).await?.up(limit).await?;
            print_run(&report);
        }
        Command::Down { steps, dry_run } => {
            let report = migrator(config, dry_run).await?.down(steps).await?;
            print_run(&report);
        }
        Command::Status { json } => {
            let status = migrator(config, false).await?.status().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                for entry in &status.entries {
                    let drift = if entry.checksum_ok { "" } else { "  (edited)" };
                    println!("{:<8} {}{drift}", status_label(entry.status), entry.id);
                }
                println!(
                    "{} applied, {} pending, {} orphaned",
                    status.count(MigrationStatus::Applied),
                    status.count(MigrationStatus::Pending),
                    status.count(MigrationStatus::Orphaned)
                );
            }
        }
        Command::Verify => {
            let set = migration_set(config)?;
            let report = verify(set.as_slice()).await;
            for issue in &report.issues {
                println!("{issue}");
            }
            if !report.is_clean() {
                bail!("{} verification issue(s)", report.issues.len());
            }
            println!(
                "{} migrations verified, {} collections in final schema",
                report.checked,
                report.final_schema.len()
            );
        }
        Command::Lint => {
            let store = open_store(config).await?;
            let mut errors = 0;
            for collection in store.list_collections().await? {
                for issue in lint_collection(&collection) {
                    if issue.severity == Severity::Error {
                        errors += 1;
                    }
                    println!("{issue}");
                }
            }
            if errors > 0 {
                bail!("{errors} rule error(s)");
            }
        }
        Command::Export { file } => {
            let store = open_store(config).await?;
            let collections = store.list_collections().await?;
            write_json(&file, &collections)?;
            info!(path = %file.display(), count = collections.len(), "exported schema");
        }
        Command::New { action, collection } => {
            let path = scaffold(&config.migrations_dir, action.into(), &collection)?;
            println!("{}", path.display());
        }
        Command::Remote { url, action } => {
            let mut config = config.clone();
            if let Some(url) = url {
                config.backend.url = url;
            }
            run_remote(action, &config).await?;
        }
    }
    Ok(())
}

async fn run_remote(action: RemoteAction, config: &MigratorConfig) -> Result<()> {
    let client = connect_backend(config).await?;
    match action {
        RemoteAction::Inspect { collection: Some(name) } => {
            let collection = client.get_collection(&name).await?;
            println!("{}", serde_json::to_string_pretty(&collection)?);
        }
        RemoteAction::Inspect { collection: None } => {
            for collection in client.list_collections().await? {
                println!(
                    "{:<16} {:<24} {:<5} {} fields",
                    collection.id,
                    collection.name,
                    collection.kind,
                    collection.fields.len()
                );
            }
        }
        RemoteAction::Records {
            collection,
            page,
            per_page,
            filter,
            sort,
        } => {
            let query = RecordQuery {
                page,
                per_page,
                filter,
                sort,
            };
            let records = client.get_records(&collection, &query).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        RemoteAction::ApplyRules {
            file,
            backup_dir,
            check,
        } => {
            let document = RulesDocument::load(&file)?;
            if config.validate_rules {
                let errors = document.syntax_errors();
                for (collection, rule, err) in &errors {
                    println!("{collection}.{rule}: {err}");
                }
                if !errors.is_empty() {
                    bail!("{} rule(s) in {} do not parse", errors.len(), file.display());
                }
            }

            if check {
                let mismatched = mismatched_rules(&client, &document).await?;
                for name in &mismatched {
                    println!("differs: {name}");
                }
                if !mismatched.is_empty() {
                    bail!("{} collection(s) differ from {}", mismatched.len(), file.display());
                }
                return Ok(());
            }

            let live = client.list_collections().await?;
            write_backup(&backup_dir, &backup_entries(&live))?;

            let summary = apply_rules(&client, &document).await;
            let remaining = mismatched_rules(&client, &document).await?;
            for name in &remaining {
                warn!(collection = %name, "rules still differ after apply");
            }
            println!(
                "{} applied, {} skipped, {} failed",
                summary.applied.len(),
                summary.skipped.len(),
                summary.failed.len()
            );
            for (name, err) in &summary.failed {
                println!("failed: {name}: {err}");
            }
            if !summary.is_success() {
                bail!("{} collection(s) failed", summary.failed.len());
            }
        }
        RemoteAction::Pull { file } => {
            let collections = client.list_collections().await?;
            write_json(&file, &collections)?;
            info!(path = %file.display(), count = collections.len(), "pulled remote schema");
        }
    }
    Ok(())
}

/// Compiled-in history plus the files in the migrations dir.
pub fn migration_set(config: &MigratorConfig) -> Result<MigrationSet> {
    let mut migrations = if config.include_builtin {
        catalog::builtin()
    } else {
        Vec::new()
    };
    migrations.extend(load_dir(&config.migrations_dir)?);
    Ok(MigrationSet::new(migrations)?)
}

async fn open_store(config: &MigratorConfig) -> Result<SqliteSchemaStore> {
    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    SqliteSchemaStore::connect(&config.database_path).await
}

async fn migrator(config: &MigratorConfig, dry_run: bool) -> Result<Migrator> {
    let store = open_store(config).await?;
    let options = MigratorOptions {
        dry_run,
        allow_checksum_drift: config.allow_checksum_drift,
        validate_rules: config.validate_rules,
    };
    Ok(Migrator::new(Arc::new(store), migration_set(config)?).with_options(options))
}

async fn connect_backend(config: &MigratorConfig) -> Result<BackendClient> {
    let Some(email) = config.backend.admin_email.as_deref() else {
        bail!("no admin email configured, set {}", config::ENV_ADMIN_EMAIL);
    };
    let Some(password) = config::admin_password() else {
        bail!("no admin password, set {}", config::ENV_ADMIN_PASSWORD);
    };
    let client = BackendClient::new(
        config.backend.url.clone(),
        Duration::from_secs(config.backend.timeout_secs),
    )?;
    client.auth_with_password(email, &password).await?;
    Ok(client)
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let text = serde_json::to_string_pretty(value).context("failed to serialize json")?;
    fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

fn status_label(status: MigrationStatus) -> &'static str {
    match status {
        MigrationStatus::Applied => "applied",
        MigrationStatus::Pending => "pending",
        MigrationStatus::Orphaned => "orphaned",
    }
}

fn print_run(report: &RunReport) {
    let prefix = if report.dry_run { "[dry run] " } else { "" };
    for id in &report.applied {
        println!("{prefix}applied  {id}");
    }
    for id in &report.reverted {
        println!("{prefix}reverted {id}");
    }
    for warning in &report.warnings {
        println!("{prefix}warning: {warning}");
    }
    if report.applied.is_empty() && report.reverted.is_empty() {
        println!("{prefix}nothing to do");
    }
}

#[cfg(test)]
mod tests {
    use migrations::{MigrationAction, load_dir};
    use tempfile::tempdir;

    use super::*;
    use crate::cli::ActionArg;

    fn config_in(dir: &Path) -> MigratorConfig {
        MigratorConfig {
            database_path: dir.join("data").join("schema.db"),
            migrations_dir: dir.join("migrations"),
            ..MigratorConfig::default()
        }
    }

    #[tokio::test]
    async fn up_then_down_against_a_fresh_database() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());

        run(Command::Up { limit: None, dry_run: false }, &config)
            .await
            .expect("up");
        let store = open_store(&config).await.expect("store");
        let names: Vec<_> = store
            .list_collections()
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert!(names.contains(&"wellness_logs".to_string()));
        assert!(!names.contains(&"wellness_entries".to_string()));

        run(Command::Down { steps: 1, dry_run: false }, &config)
            .await
            .expect("down");
        let status = migrator(&config, false)
            .await
            .expect("migrator")
            .status()
            .await
            .expect("status");
        assert_eq!(status.count(MigrationStatus::Pending), 1);
    }

    #[tokio::test]
    async fn dry_run_leaves_database_empty() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());

        run(Command::Up { limit: None, dry_run: true }, &config)
            .await
            .expect("dry run");
        let store = open_store(&config).await.expect("store");
        assert!(store.list_collections().await.expect("list").is_empty());
        assert!(store.applied_migrations().await.expect("ledger").is_empty());
    }

    #[tokio::test]
    async fn scaffolded_files_join_the_builtin_history() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());

        run(
            Command::New {
                action: ActionArg::Updated,
                collection: "classes".to_string(),
            },
            &config,
        )
        .await
        .expect("new");

        let files = load_dir(&config.migrations_dir).expect("load");
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].id.action(), MigrationAction::Updated);

        let set = migration_set(&config).expect("set");
        assert_eq!(set.len(), catalog::builtin().len() + 1);
        run(Command::Verify, &config).await.expect("verify");
    }

    #[tokio::test]
    async fn export_writes_current_schema() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());
        run(Command::Up { limit: Some(2), dry_run: false }, &config)
            .await
            .expect("up");

        let out = dir.path().join("out").join("schema.json");
        run(Command::Export { file: out.clone() }, &config)
            .await
            .expect("export");
        let exported: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(&out).expect("read")).expect("json");
        let names: Vec<_> = exported.iter().filter_map(|c| c["name"].as_str()).collect();
        assert_eq!(names, vec!["tenants", "users"]);

        run(Command::Lint, &config).await.expect("lint");
    }

    #[tokio::test]
    async fn remote_commands_need_credentials() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let err = run(
            Command::Remote {
                url: None,
                action: RemoteAction::Inspect { collection: None },
            },
            &config,
        )
        .await
        .expect_err("missing email");
        assert!(err.to_string().contains(config::ENV_ADMIN_EMAIL));
    }
}
