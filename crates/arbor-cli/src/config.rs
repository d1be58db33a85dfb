use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use arbor_db_postgres::PostgresConfig;
use arbor_search::SearchSettings;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_FILE: &str = "arbor.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: PostgresConfig,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// TOML registry definition.
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
    /// Namespace searched when none is given on the command line.
    #[serde(default)]
    pub namespace: Option<String>,
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("registry.toml")
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
            namespace: None,
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            bail!("database.url must not be empty");
        }
        if self.database.pool_size == 0 {
            bail!("database.pool_size must be > 0");
        }
        if self.search.default_limit == 0 {
            bail!("search.default_limit must be > 0");
        }
        if self.search.max_limit == 0 {
            bail!("search.max_limit must be > 0");
        }
        if self.search.default_limit > self.search.max_limit {
            bail!("search.default_limit must be <= search.max_limit");
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            bail!("logging.level must be one of {valid_levels:?}");
        }
        if self.registry.path.as_os_str().is_empty() {
            bail!("registry.path must not be empty");
        }
        Ok(())
    }
}

/// Loads the configuration file (if any), then `ARBOR__SECTION__KEY`
/// environment overrides, e.g. `ARBOR__DATABASE__URL`.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    load_config_from(path, None)
}

/// `env` replaces the process environment when given.
fn load_config_from(
    path: Option<&Path>,
    env: Option<HashMap<String, String>>,
) -> Result<AppConfig> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            if !p.exists() {
                bail!("config file {} does not exist", p.display());
            }
            builder = builder.add_source(File::from(p));
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path));
            }
        }
    }
    builder = builder.add_source(
        Environment::with_prefix("ARBOR")
            .try_parsing(true)
            .separator("__")
            .source(env),
    );

    let merged: AppConfig = builder
        .build()
        .context("config build error")?
        .try_deserialize()
        .context("config deserialize error")?;
    merged.validate()?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
[database]
url = "postgres://arbor:secret@db/arbor"
pool_size = 4

[search]
default_limit = 50

[logging]
level = "debug"

[registry]
path = "seeds.toml"
namespace = "accessions"
"#,
        );
        let config = load_config_from(Some(file.path()), Some(HashMap::new())).unwrap();
        assert_eq!(config.database.url, "postgres://arbor:secret@db/arbor");
        assert_eq!(config.database.pool_size, 4);
        assert_eq!(config.database.connect_timeout_ms, 5000);
        assert_eq!(config.search.default_limit, 50);
        assert_eq!(config.search.max_limit, 1000);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.registry.path, PathBuf::from("seeds.toml"));
        assert_eq!(config.registry.namespace.as_deref(), Some("accessions"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config("[search]\ndefault_limit = 50\n");
        let env = HashMap::from([
            ("ARBOR__SEARCH__DEFAULT_LIMIT".to_string(), "10".to_string()),
            ("ARBOR__SEARCH__FUZZY_FALLBACK".to_string(), "false".to_string()),
            ("ARBOR__DATABASE__URL".to_string(), "postgres://env/arbor".to_string()),
        ]);
        let config = load_config_from(Some(file.path()), Some(env)).unwrap();
        assert_eq!(config.search.default_limit, 10);
        assert!(!config.search.fuzzy_fallback);
        assert_eq!(config.database.url, "postgres://env/arbor");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = load_config_from(Some(Path::new("/nonexistent/arbor.toml")), Some(HashMap::new()))
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_validate() {
        assert!(AppConfig::default().validate().is_ok());

        let mut config = AppConfig::default();
        config.search.default_limit = 2000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));

        let mut config = AppConfig::default();
        config.database.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
