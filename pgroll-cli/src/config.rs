//! CLI configuration: `pgroll.toml` plus environment variable overrides.

use std::path::Path;

use pgroll_core::BackfillConfig;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, CliResult};

/// Default config file name (lives in the project root).
pub const CONFIG_FILE_NAME: &str = "pgroll.toml";

/// Default internal schema holding the migrations history table.
pub const DEFAULT_INTERNAL_SCHEMA: &str = "pgroll";

/// Default target schema the engine operates on.
pub const DEFAULT_SCHEMA: &str = "public";

/// Resolved CLI configuration: where to connect, which schema to evolve,
/// and how aggressively to backfill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database connection settings.
    pub database: DatabaseConfig,

    /// Backfill batching/retry tuning, mapped onto
    /// [`pgroll_core::BackfillConfig`].
    pub backfill: BackfillSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            backfill: BackfillSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from `path` if it exists, else fall back to
    /// defaults, then apply `PGROLL_DATABASE_URL`/`PGROLL_SCHEMA`
    /// environment overrides (these win over the file either way).
    pub fn load(path: &Path) -> CliResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var("PGROLL_DATABASE_URL") {
            config.database.url = Some(url);
        }
        if let Ok(schema) = std::env::var("PGROLL_SCHEMA") {
            config.database.schema = schema;
        }

        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> CliResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The database URL to connect with, or a config error naming both
    /// places it could have come from.
    pub fn database_url(&self) -> CliResult<&str> {
        self.database.url.as_deref().ok_or_else(|| {
            CliError::Config(
                "no database URL configured: set `database.url` in pgroll.toml or the \
                 PGROLL_DATABASE_URL environment variable"
                    .to_string(),
            )
        })
    }
}

/// Database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: Option<String>,

    /// Physical schema the engine evolves (tables live here).
    pub schema: String,

    /// Internal schema holding the `migrations` history table.
    pub internal_schema: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            schema: DEFAULT_SCHEMA.to_string(),
            internal_schema: DEFAULT_INTERNAL_SCHEMA.to_string(),
        }
    }
}

/// Backfill batching/retry tuning, as stored in `pgroll.toml`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillSettings {
    /// Rows touched per batch.
    pub batch_size: i64,
    /// Maximum retry attempts for a batch hitting a retryable error.
    pub max_retries: u32,
    /// Initial backoff before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the backoff after each retry.
    pub backoff_multiplier: f64,
}

impl Default for BackfillSettings {
    fn default() -> Self {
        let defaults = BackfillConfig::default();
        Self {
            batch_size: defaults.batch_size,
            max_retries: defaults.max_retries,
            initial_backoff_ms: defaults.initial_backoff_ms,
            backoff_multiplier: defaults.backoff_multiplier,
        }
    }
}

impl From<BackfillSettings> for BackfillConfig {
    fn from(settings: BackfillSettings) -> Self {
        BackfillConfig {
            batch_size: settings.batch_size,
            max_retries: settings.max_retries,
            initial_backoff_ms: settings.initial_backoff_ms,
            backoff_multiplier: settings.backoff_multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_public_schema_and_pgroll_internal_schema() {
        let config = Config::default();
        assert_eq!(config.database.schema, "public");
        assert_eq!(config.database.internal_schema, "pgroll");
    }

    #[test]
    fn backfill_settings_default_matches_core_defaults() {
        let settings = BackfillSettings::default();
        let core: BackfillConfig = settings.into();
        assert_eq!(core, BackfillConfig::default());
    }

    #[test]
    fn missing_database_url_is_a_config_error() {
        let config = Config::default();
        assert!(matches!(config.database_url(), Err(CliError::Config(_))));
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("pgroll.toml")).unwrap();
        assert_eq!(config.database.schema, "public");
    }

    #[test]
    fn load_reads_an_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pgroll.toml");
        std::fs::write(&path, "[database]\nschema = \"tenant_a\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.schema, "tenant_a");
    }
}
