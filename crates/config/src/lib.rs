use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

pub const ENV_BACKEND_URL: &str = "POCKETBASE_URL";
pub const ENV_ADMIN_EMAIL: &str = "POCKETBASE_ADMIN_EMAIL";
pub const ENV_ADMIN_PASSWORD: &str = "POCKETBASE_ADMIN_PASSWORD";
pub const ENV_DATABASE: &str = "PBMIGRATE_DATABASE";
pub const ENV_MIGRATIONS_DIR: &str = "PBMIGRATE_MIGRATIONS_DIR";
pub const ENV_LOG: &str = "PBMIGRATE_LOG";

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8090";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    /// The password is never stored; it comes from the environment.
    #[serde(default)]
    pub admin_email: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_BACKEND_URL.to_string(),
            admin_email: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `migrations=debug`.
    pub level: String,
    /// Daily rolling log files go here; stderr only when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigratorConfig {
    pub schema_version: u32,
    pub database_path: PathBuf,
    pub migrations_dir: PathBuf,
    #[serde(default = "default_true")]
    pub include_builtin: bool,
    #[serde(default = "default_true")]
    pub validate_rules: bool,
    #[serde(default)]
    pub allow_checksum_drift: bool,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_true() -> bool {
    true
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            database_path: PathBuf::from("pb_data/schema.db"),
            migrations_dir: PathBuf::from("pb_migrations"),
            include_builtin: true,
            validate_rules: true,
            allow_checksum_drift: false,
            backend: BackendConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl MigratorConfig {
    /// Overrides values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = lookup(ENV_BACKEND_URL) {
            debug!(%url, "backend url from environment");
            self.backend.url = url;
        }
        if let Some(email) = lookup(ENV_ADMIN_EMAIL) {
            self.backend.admin_email = Some(email);
        }
        if let Some(path) = lookup(ENV_DATABASE) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup(ENV_MIGRATIONS_DIR) {
            self.migrations_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.log.level = level;
        }
    }
}

/// Superuser password for the maintenance client.
pub fn admin_password() -> Option<String> {
    std::env::var(ENV_ADMIN_PASSWORD)
        .ok()
        .filter(|value| !value.is_empty())
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_default_location() -> Result<Self> {
        let mut dir = dirs::config_dir().context("failed to resolve config_dir")?;
        dir.push("pbmigrate");
        Ok(Self::from_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_or_init(&self) -> Result<MigratorConfig> {
        if !self.path.exists() {
            let config = MigratorConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut config: MigratorConfig =
            serde_json::from_str(&raw).context("failed to parse migrator config json")?;
        if self.migrate(&mut config) {
            self.save(&config)?;
        }
        Ok(config)
    }

    pub fn save(&self, config: &MigratorConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let text = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    /// Brings an older document up to date. Returns whether anything changed.
    fn migrate(&self, config: &mut MigratorConfig) -> bool {
        if config.schema_version >= CURRENT_SCHEMA_VERSION {
            return false;
        }

        warn!(
            from = config.schema_version,
            to = CURRENT_SCHEMA_VERSION,
            "migrating migrator config schema"
        );

        // Version 1 stored no backend section and an empty log level.
        if config.backend.url.trim().is_empty() {
            config.backend.url = DEFAULT_BACKEND_URL.to_string();
        }
        if config.log.level.trim().is_empty() {
            config.log.level = LogConfig::default().level;
        }
        config.schema_version = CURRENT_SCHEMA_VERSION;
        true
    }
}
