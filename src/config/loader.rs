//! Configuration Loader
//!
//! Environment-aware configuration loading. Reads `bulk-engine.yaml` from the
//! configuration directory, merges the section named after the current
//! environment over the base document, applies environment-variable
//! overrides and validates the result.

use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::EngineConfig;

const CONFIG_FILE_NAMES: [&str; 2] = ["bulk-engine.yaml", "bulk-engine.yml"];
const ENVIRONMENTS: [&str; 3] = ["development", "test", "production"];
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

pub struct ConfigManager {
    config: EngineConfig,
    environment: String,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Useful in tests that must not touch process-wide variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));
        let config_file = Self::find_config_file(&config_directory);

        let mut config = match &config_file {
            Some(path) => Self::load_and_merge_config(path, environment)?,
            None => {
                debug!(
                    "No configuration file in {}, using defaults",
                    config_directory.display()
                );
                EngineConfig::default()
            }
        };

        Self::apply_env_overrides(&mut config)?;
        config.validate()?;

        info!(
            environment = %environment,
            config_file = ?config_file,
            chunk_size = config.bulk.chunk_size,
            max_concurrency = config.bulk.max_concurrency,
            reconcile_interval_secs = config.reconciliation.interval_seconds,
            "CONFIG: Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_file,
        }))
    }

    /// Wrap an already-built configuration (validated).
    pub fn from_config(config: EngineConfig, environment: &str) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            environment: environment.to_string(),
            config_file: None,
        }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// BULK_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var("BULK_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn find_config_file(config_directory: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| config_directory.join(name))
            .find(|path| path.is_file())
    }

    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                "configuration file larger than 1MB",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn load_and_merge_config(config_file: &Path, environment: &str) -> ConfigResult<EngineConfig> {
        let yaml_content = Self::read_config_file_safely(config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!("Applying environment-specific overrides for: {}", environment);
            Self::merge_yaml_values(&mut yaml_data, env_overrides);
        }

        // Drop environment sections before deserializing
        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for name in ENVIRONMENTS {
                map.remove(YamlValue::String(name.to_string()));
            }
            map.remove(YamlValue::String(environment.to_string()));
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("Failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value);
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
    }

    fn apply_env_overrides(config: &mut EngineConfig) -> ConfigResult<()> {
        fn parse_var<T: std::str::FromStr>(name: &str) -> ConfigResult<Option<T>> {
            match env::var(name) {
                Ok(raw) => raw
                    .trim()
                    .parse::<T>()
                    .map(Some)
                    .map_err(|_| ConfigurationError::invalid_value(name, raw, "not a number")),
                Err(_) => Ok(None),
            }
        }

        if let Some(value) = parse_var::<usize>("BULK_CHUNK_SIZE")? {
            debug!("BULK_CHUNK_SIZE override: {}", value);
            config.bulk.chunk_size = value;
        }
        if let Some(value) = parse_var::<usize>("BULK_MAX_CONCURRENCY")? {
            debug!("BULK_MAX_CONCURRENCY override: {}", value);
            config.bulk.max_concurrency = value;
        }
        if let Some(value) = parse_var::<usize>("BULK_MAX_SYNC_RECORDS")? {
            config.bulk.max_sync_records = value;
        }
        if let Some(value) = parse_var::<u64>("BULK_RECONCILE_INTERVAL_SECS")? {
            config.reconciliation.interval_seconds = value;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = r#"
bulk:
  chunk_size: 50
  max_concurrency: 4
reconciliation:
  interval_seconds: 600
  batch_size: 20
test:
  bulk:
    max_concurrency: 2
  reconciliation:
    interval_seconds: 1
production:
  bulk:
    max_concurrency: 32
"#;

    #[test]
    fn test_environment_overrides_merge_over_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bulk-engine.yaml"), SAMPLE).unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        let config = manager.config();
        assert_eq!(manager.environment(), "test");
        assert_eq!(config.bulk.chunk_size, 50);
        assert_eq!(config.bulk.max_concurrency, 2);
        assert_eq!(config.reconciliation.interval_seconds, 1);
        assert_eq!(config.reconciliation.batch_size, 20);
        assert!(manager.config_file().is_some());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "development",
        )
        .unwrap();
        assert!(manager.config_file().is_none());
        assert_eq!(manager.config().bulk.chunk_size, 100);
    }

    #[test]
    fn test_invalid_yaml_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bulk-engine.yml"), "bulk: [unclosed").unwrap();

        let err = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "development",
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigurationError::InvalidYaml { .. }));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bulk-engine.yaml"), "bulk:\n  max_concurrency: 0\n").unwrap();

        let err = ConfigManager::load_from_directory_with_env(
            Some(dir.path().to_path_buf()),
            "development",
        )
        .err()
        .unwrap();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }
}
