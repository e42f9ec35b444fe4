use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use schema_types::{AppliedMigration, ChangeSet, Collection, CollectionId, SchemaStore};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

pub const CURRENT_DB_SCHEMA_VERSION: u32 = 1;

/// Schema store backed by a SQLite file. Collections are stored as their
/// JSON definition; applied migrations live in `_migrations`.
#[derive(Debug, Clone)]
pub struct SqliteSchemaStore {
    pool: SqlitePool,
}

impl SqliteSchemaStore {
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}",
            path.as_ref().to_string_lossy()
        ))?
        .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open {}", path.as_ref().display()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                type TEXT NOT NULL,
                position INTEGER NOT NULL,
                definition TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                file TEXT PRIMARY KEY,
                checksum TEXT NOT NULL,
                batch TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO metadata(key, value)
            VALUES ('schema_version', ?1)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(CURRENT_DB_SCHEMA_VERSION.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn schema_version(&self) -> Result<u32> {
        let row = sqlx::query("SELECT value FROM metadata WHERE key = 'schema_version'")
            .fetch_one(&self.pool)
            .await?;
        let version = row.get::<String, _>("value").parse::<u32>()?;
        Ok(version)
    }
}

async fn load_collections(
    tx: &mut Transaction<'_, Sqlite>,
) -> Result<IndexMap<CollectionId, Collection>> {
    let rows = sqlx::query("SELECT definition FROM collections ORDER BY position ASC")
        .fetch_all(&mut **tx)
        .await?;
    rows.into_iter()
        .map(|row| map_collection_row(row).map(|c| (c.id.clone(), c)))
        .collect()
}

#[async_trait]
impl SchemaStore for SqliteSchemaStore {
    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query("SELECT definition FROM collections ORDER BY position ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(map_collection_row).collect()
    }

    async fn applied_migrations(&self) -> Result<Vec<AppliedMigration>> {
        let rows = sqlx::query(
            r#"
            SELECT file, checksum, batch, applied_at
            FROM _migrations
            ORDER BY applied_at ASC, file ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_migration_row).collect()
    }

    /// Validates the resulting schema and writes collections and ledger rows
    /// in one transaction.
    async fn commit(&self, changes: ChangeSet) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let mut collections = load_collections(&mut tx).await?;
        changes
            .apply_to(&mut collections)
            .context("rejected schema change")?;

        for id in &changes.deleted {
            sqlx::query("DELETE FROM collections WHERE id = ?1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let now = Utc::now().to_rfc3339();
        for collection in &changes.saved {
            sqlx::query(
                r#"
                INSERT INTO collections(id, name, type, position, definition, updated_at)
                VALUES (?1, ?2, ?3, 0, ?4, ?5)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    type = excluded.type,
                    definition = excluded.definition,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&collection.id)
            .bind(&collection.name)
            .bind(collection.kind.to_string())
            .bind(serde_json::to_string(collection)?)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        if !changes.saved.is_empty() || !changes.deleted.is_empty() {
            for (position, id) in collections.keys().enumerate() {
                sqlx::query("UPDATE collections SET position = ?2 WHERE id = ?1")
                    .bind(id)
                    .bind(position as i64)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        for file in &changes.reverted {
            sqlx::query("DELETE FROM _migrations WHERE file = ?1")
                .bind(file)
                .execute(&mut *tx)
                .await?;
        }
        for applied in &changes.applied {
            sqlx::query(
                r#"
                INSERT INTO _migrations(file, checksum, batch, applied_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(file) DO UPDATE SET
                    checksum = excluded.checksum,
                    batch = excluded.batch,
                    applied_at = excluded.applied_at
                "#,
            )
            .bind(&applied.id)
            .bind(&applied.checksum)
            .bind(applied.batch.to_string())
            .bind(applied.applied_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn map_collection_row(row: SqliteRow) -> Result<Collection> {
    let definition: String = row.get("definition");
    serde_json::from_str(&definition).context("invalid collection definition in database")
}

fn map_migration_row(row: SqliteRow) -> Result<AppliedMigration> {
    Ok(AppliedMigration {
        id: row.get("file"),
        checksum: row.get("checksum"),
        batch: Uuid::parse_str(row.get::<String, _>("batch").as_str())?,
        applied_at: parse_rfc3339(row.get::<String, _>("applied_at"))?,
    })
}

fn parse_rfc3339(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use migrations::{Migrator, catalog};
    use schema_types::{Field, RuleKind};
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn saves_and_reads_collections_in_order() {
        let store = SqliteSchemaStore::in_memory().await.expect("store");
        assert_eq!(
            store.schema_version().await.expect("schema version"),
            CURRENT_DB_SCHEMA_VERSION
        );

        store
            .commit(
                ChangeSet::new()
                    .save(Collection::base("pbc_1", "tenants"))
                    .save(Collection::base("pbc_2", "classes").with_field(Field::relation(
                        "relation1",
                        "tenantId",
                        "pbc_1",
                    ))),
            )
            .await
            .expect("commit");

        let names: Vec<String> = store
            .list_collections()
            .await
            .expect("list")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["tenants", "classes"]);

        let classes = store
            .find_collection_by_name_or_id("CLASSES")
            .await
            .expect("classes");
        assert_eq!(classes.fields.get_by_name("tenantId").map(|f| f.id.as_str()), Some("relation1"));
    }

    #[tokio::test]
    async fn invalid_commit_writes_nothing() {
        let store = SqliteSchemaStore::in_memory().await.expect("store");
        let err = store
            .commit(
                ChangeSet::new()
                    .save(Collection::base("pbc_1", "rooms"))
                    .save(Collection::base("pbc_2", "classes").with_field(Field::relation(
                        "relation1",
                        "room",
                        "pbc_404",
                    ))),
            )
            .await
            .expect_err("dangling relation");
        assert!(format!("{err:#}").contains("pbc_404"));
        assert!(store.list_collections().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn ledger_rows_round_trip() {
        let store = SqliteSchemaStore::in_memory().await.expect("store");
        let applied = AppliedMigration {
            id: "1764930416_updated_tenants".to_string(),
            checksum: "abc123".to_string(),
            batch: Uuid::new_v4(),
            applied_at: Utc::now(),
        };
        store
            .commit(ChangeSet::new().record_applied(applied.clone()))
            .await
            .expect("record");
        let ledger = store.applied_migrations().await.expect("ledger");
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].id, applied.id);
        assert_eq!(ledger[0].batch, applied.batch);

        store
            .commit(ChangeSet::new().record_reverted(applied.id.clone()))
            .await
            .expect("revert");
        assert!(store.applied_migrations().await.expect("ledger").is_empty());
    }

    #[tokio::test]
    async fn builtin_history_persists_across_reconnects() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("schema.db");

        {
            let store = Arc::new(SqliteSchemaStore::connect(&path).await.expect("connect"));
            let runner = Migrator::new(store, catalog::builtin_set().expect("set"));
            runner.up(None).await.expect("up");
        }

        let store = Arc::new(SqliteSchemaStore::connect(&path).await.expect("reconnect"));
        let logs = store
            .find_collection_by_name_or_id("wellness_logs")
            .await
            .expect("wellness_logs");
        assert_eq!(logs.rules.get(RuleKind::Update), Some("@request.auth.id = user.id"));
        assert_eq!(logs.rules.get(RuleKind::Create), Some(""));

        let runner = Migrator::new(store.clone(), catalog::builtin_set().expect("set"));
        let report = runner.up(None).await.expect("second up");
        assert!(report.applied.is_empty());

        runner.down(1).await.expect("down");
        let classes = store
            .find_collection_by_name_or_id("classes")
            .await
            .expect("classes");
        assert_eq!(classes.fields.position_of("json1295596212"), Some(5));
    }
}
