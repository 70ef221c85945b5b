//! Application configuration
//!
//! Resolved once at startup from the embedded defaults, optional files and
//! the environment, then passed to whatever needs it.

use anyhow::{Context, Result};
use conductor_core::{
    ContextConfig, CoordinatorConfig, LearningConfig, PlannerConfig, ProvisionerConfig,
    WorkflowConfig,
};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Everything the binary can be configured with
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub provisioner: ProvisionerConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub learning: LearningConfig,
}

/// Where memory and checkpoints live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-process only; nothing survives the command
    Memory,
    /// SQLite files under the data directory
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Empty means the platform data directory
    #[serde(default)]
    pub data_dir: String,
    #[serde(default = "default_memory_db")]
    pub memory_db: String,
    #[serde(default = "default_checkpoint_db")]
    pub checkpoint_db: String,
}

fn default_memory_db() -> String {
    "memory.db".to_string()
}

fn default_checkpoint_db() -> String {
    "checkpoints.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: String::new(),
            memory_db: default_memory_db(),
            checkpoint_db: default_checkpoint_db(),
        }
    }
}

impl StorageConfig {
    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        if self.data_dir.trim().is_empty() {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("conductor")
        } else {
            PathBuf::from(&self.data_dir)
        }
    }

    pub fn memory_path(&self) -> PathBuf {
        self.data_dir().join(&self.memory_db)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.data_dir().join(&self.checkpoint_db)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub fn directive(&self) -> String {
        let level = &self.level;
        format!("conductor={level},conductor_core={level},conductor_memory={level}")
    }
}

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let env = std::env::var("CONDUCTOR_ENV").unwrap_or_else(|_| "development".to_string());
    let config = Config::builder()
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{env}")).required(false))
        .add_source(File::with_name("config/local").required(false))
        // CONDUCTOR_WORKFLOW__AUTO_APPROVE=true
        .add_source(
            Environment::with_prefix("CONDUCTOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(extra, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_embedded_defaults_match_component_defaults() {
        let config = parse("");
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.planner, PlannerConfig::default());
        assert_eq!(config.coordinator, CoordinatorConfig::default());
        assert_eq!(config.workflow, WorkflowConfig::default());
        assert_eq!(config.learning, LearningConfig::default());
        assert_eq!(config.context.max_records, 20);
    }

    #[test]
    fn test_overrides_apply() {
        let config = parse(
            r#"
            [storage]
            backend = "memory"
            data_dir = "/tmp/conductor-test"

            [workflow]
            auto_approve = true
            "#,
        );
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(
            config.storage.checkpoint_path(),
            PathBuf::from("/tmp/conductor-test/checkpoints.db")
        );
        assert!(config.workflow.auto_approve);
        assert_eq!(config.workflow.approval_timeout_secs, 300);
    }

    #[test]
    fn test_log_directive() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            json: false,
        };
        assert_eq!(
            logging.directive(),
            "conductor=debug,conductor_core=debug,conductor_memory=debug"
        );
    }
}
