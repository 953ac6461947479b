use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

const CONFIG_DIR: &str = "media-session";

/// Optional behaviours that differ between platform revisions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureGates {
    /// Recorders may continue into the next output file at the size limit
    pub max_file_size_rollover: bool,
    /// `reset` cancels an in-flight configure, prepare or start instead of
    /// queueing behind it
    pub async_reset: bool,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self {
            max_file_size_rollover: false,
            async_reset: true,
        }
    }
}

/// Engine configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub input_buffer_count: usize,
    pub output_buffer_count: usize,
    /// Bytes per buffer unless a descriptor sets `max_input_size`
    pub buffer_capacity: usize,
    /// Upper bound for `buffer_capacity` and a descriptor's `max_input_size`
    pub max_buffer_capacity: usize,
    pub operation_timeout_ms: u64,
    pub capability_file: Option<PathBuf>,
    pub position_update_interval_ms: u64,
    pub log_level: String,
    pub features: FeatureGates,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_buffer_count: 8,
            output_buffer_count: 8,
            buffer_capacity: 64 * 1024,
            max_buffer_capacity: 16 * 1024 * 1024,
            operation_timeout_ms: 5000,
            capability_file: None,
            position_update_interval_ms: 1000,
            log_level: "info".to_string(),
            features: FeatureGates::default(),
        }
    }
}

impl EngineConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn position_update_interval(&self) -> Duration {
        Duration::from_millis(self.position_update_interval_ms.max(1))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_buffer_count == 0 || self.output_buffer_count == 0 {
            return Err(ConfigError::InvalidValue(
                "buffer counts must be at least 1".to_string(),
            ));
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "buffer_capacity must be positive".to_string(),
            ));
        }
        if self.buffer_capacity > self.max_buffer_capacity {
            return Err(ConfigError::InvalidValue(format!(
                "buffer_capacity {} exceeds max_buffer_capacity {}",
                self.buffer_capacity, self.max_buffer_capacity
            )));
        }
        if self.operation_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "operation_timeout_ms must be positive".to_string(),
            ));
        }
        if self.log_level.parse::<log::LevelFilter>().is_err() {
            return Err(ConfigError::InvalidValue(format!(
                "unknown log level '{}'",
                self.log_level
            )));
        }
        Ok(())
    }
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config: EngineConfig,
    config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_path = Self::get_config_path()?;
        Self::with_path(config_path)
    }

    /// Manager backed by an explicit file; a missing file means defaults
    pub fn with_path(config_path: PathBuf) -> Result<Self, ConfigError> {
        let config = Self::load_config(&config_path)?;
        config.validate()?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub fn get_config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn update_config<F>(&mut self, updater: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut EngineConfig),
    {
        let mut updated = self.config.clone();
        updater(&mut updated);
        updated.validate()?;
        self.config = updated;
        self.save_config()
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.config = EngineConfig::default();
        self.save_config()
    }

    fn get_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or(ConfigError::ConfigDirNotFound)?
            .join(CONFIG_DIR);

        std::fs::create_dir_all(&config_dir).map_err(ConfigError::IoError)?;

        Ok(config_dir.join("config.toml"))
    }

    fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
        if !path.exists() {
            return Ok(EngineConfig::default());
        }

        let config_content = std::fs::read_to_string(path).map_err(ConfigError::IoError)?;

        toml::from_str(&config_content).map_err(ConfigError::DeserializationError)
    }

    fn save_config(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::IoError)?;
        }

        let config_content =
            toml::to_string_pretty(&self.config).map_err(ConfigError::SerializationError)?;

        std::fs::write(&self.config_path, config_content).map_err(ConfigError::IoError)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config_manager = ConfigManager {
            config: EngineConfig::default(),
            config_path,
        };

        (config_manager, temp_dir)
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();

        assert_eq!(config.input_buffer_count, 8);
        assert_eq!(config.output_buffer_count, 8);
        assert_eq!(config.buffer_capacity, 65536);
        assert_eq!(config.max_buffer_capacity, 16 * 1024 * 1024);
        assert_eq!(config.operation_timeout(), Duration::from_secs(5));
        assert_eq!(config.capability_file, None);
        assert_eq!(config.position_update_interval(), Duration::from_secs(1));
        assert!(!config.features.max_file_size_rollover);
        assert!(config.features.async_reset);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            buffer_capacity = 4096

            [features]
            max_file_size_rollover = true
            "#,
        )
        .unwrap();

        assert_eq!(config.buffer_capacity, 4096);
        assert_eq!(config.input_buffer_count, 8);
        assert!(config.features.max_file_size_rollover);
        assert!(config.features.async_reset);
    }

    #[test]
    fn test_save_and_load_config() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.config.output_buffer_count = 2;
        config_manager.config.capability_file = Some(PathBuf::from("/etc/codecs.toml"));
        config_manager.save_config().unwrap();

        let loaded_config = ConfigManager::load_config(&config_manager.config_path).unwrap();

        assert_eq!(loaded_config.output_buffer_count, 2);
        assert_eq!(loaded_config.capability_file, Some(PathBuf::from("/etc/codecs.toml")));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let temp_dir = TempDir::new().unwrap();
        let config = ConfigManager::load_config(&temp_dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_load_invalid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        fs::write(&config_path, "invalid toml content [[[").unwrap();

        match ConfigManager::load_config(&config_path) {
            Err(ConfigError::DeserializationError(_)) => {}
            other => panic!("Expected DeserializationError, got {:?}", other),
        }
    }

    #[test]
    fn test_with_path_rejects_invalid_values() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "input_buffer_count = 0\n").unwrap();

        assert!(matches!(
            ConfigManager::with_path(config_path),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_buffer_capacity_is_bounded() {
        let config = EngineConfig {
            buffer_capacity: 4096,
            max_buffer_capacity: 1024,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let config = EngineConfig {
            buffer_capacity: 1024,
            max_buffer_capacity: 1024,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_update_config_is_validated_and_saved() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager
            .update_config(|config| config.operation_timeout_ms = 250)
            .unwrap();
        let loaded = ConfigManager::load_config(&config_manager.config_path).unwrap();
        assert_eq!(loaded.operation_timeout_ms, 250);

        let err = config_manager.update_config(|config| config.log_level = "loud".to_string());
        assert!(err.is_err());
        assert_eq!(config_manager.get_config().log_level, "info");
    }

    #[test]
    fn test_reset_to_defaults() {
        let (mut config_manager, _temp_dir) = create_test_config_manager();

        config_manager.config.buffer_capacity = 512;
        config_manager.config.features.async_reset = false;
        config_manager.reset_to_defaults().unwrap();

        assert_eq!(config_manager.get_config(), &EngineConfig::default());
    }

    #[test]
    fn test_config_path_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("config").join("config.toml");

        let config_manager = ConfigManager {
            config: EngineConfig::default(),
            config_path: nested_path.clone(),
        };
        config_manager.save_config().unwrap();

        assert!(nested_path.exists());
    }

    #[test]
    fn test_toml_format() {
        let toml_string = toml::to_string_pretty(&EngineConfig::default()).unwrap();

        assert!(toml_string.contains("input_buffer_count"));
        assert!(toml_string.contains("operation_timeout_ms = 5000"));
        assert!(toml_string.contains("[features]"));
        assert!(toml_string.contains("max_file_size_rollover = false"));
    }

    #[test]
    fn test_json_serialization() {
        let config = EngineConfig {
            capability_file: Some(PathBuf::from("/etc/media/codecs.toml")),
            features: FeatureGates {
                max_file_size_rollover: true,
                async_reset: false,
            },
            ..EngineConfig::default()
        };
        let serialized = serde_json::to_string(&config).expect("Failed to serialize EngineConfig");
        let deserialized: EngineConfig = serde_json::from_str(&serialized).expect("Failed to deserialize EngineConfig");
        assert_eq!(config, deserialized);

        // missing fields fall back to defaults
        let partial: EngineConfig = serde_json::from_str(r#"{ "input_buffer_count": 2 }"#).unwrap();
        assert_eq!(partial.input_buffer_count, 2);
        assert_eq!(partial.output_buffer_count, 8);
    }
}
