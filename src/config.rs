// Runtime configuration for the CLI and server
//
// Precedence: environment variables > JSON config file > defaults

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub const ENV_DB: &str = "YEAR_GUARD_DB";
pub const ENV_LOG: &str = "YEAR_GUARD_LOG";
pub const ENV_BIND: &str = "YEAR_GUARD_BIND";
pub const ENV_CONFIG: &str = "YEAR_GUARD_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database holding schools, years, selections and events
    pub database_path: PathBuf,

    /// tracing-subscriber EnvFilter directive
    pub log_filter: String,

    /// Server listen address
    pub bind_addr: String,

    /// Actor name recorded in audit events
    pub actor: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("academic_years.db"),
            log_filter: "info".to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
            actor: "cli".to_string(),
        }
    }
}

impl Config {
    /// Read a JSON config file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        Ok(config)
    }

    /// Defaults, then `$YEAR_GUARD_CONFIG` if set, then env overrides
    pub fn load() -> Result<Self> {
        let base = match env::var_os(ENV_CONFIG) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        Ok(base.with_overrides(|key| env::var(key).ok()))
    }

    /// Apply overrides from a key lookup (the environment, in practice)
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(db) = lookup(ENV_DB) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(filter) = lookup(ENV_LOG) {
            self.log_filter = filter;
        }
        if let Some(bind) = lookup(ENV_BIND) {
            self.bind_addr = bind;
        }
        self
    }
}

/// Install the global tracing subscriber; `RUST_LOG` wins over the configured filter
pub fn init_logging(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if let Err(error) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
    {
        tracing::debug!(error = %error, "Tracing subscriber already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.database_path, PathBuf::from("academic_years.db"));
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_from_file_fills_missing_keys_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"database_path": "/tmp/years.db", "actor": "registrar"}}"#).unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/years.db"));
        assert_eq!(config.actor, "registrar");
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }

    #[test]
    fn test_from_file_rejects_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(Config::from_file(file.path()).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let env: HashMap<&str, &str> =
            [(ENV_DB, "/data/override.db"), (ENV_LOG, "debug")].into_iter().collect();

        let config = Config::default().with_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_path, PathBuf::from("/data/override.db"));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.bind_addr, "0.0.0.0:3000");
    }
}
