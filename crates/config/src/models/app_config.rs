use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    logging::ObservabilityConfig, message_queue::QueueConfig, metadata_api::MetadataApiConfig,
    storage::StorageConfig, worker::WorkerConfig,
};
use crate::validation::ConfigValidator;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub metadata_api: MetadataApiConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 加载顺序：默认值 < TOML 文件 < `EVALUATOR_` 环境变量
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = [
                "config/evaluator.toml",
                "evaluator.toml",
                "/etc/evaluator/config.toml",
            ];

            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        // EVALUATOR_WORKER__EARLY_FAILURE_THRESHOLD=8
        builder = builder.add_source(
            Environment::with_prefix("EVALUATOR")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        self.queue.validate()?;
        self.storage.validate()?;
        self.metadata_api.validate()?;
        self.worker.validate()?;
        self.observability.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LogLevel, OutputFormat, QueueType};
    use std::io::Write;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();
        assert_eq!(config.worker.early_failure_threshold, 4);
        assert_eq!(config.worker.heartbeat_interval_seconds, 60);
        assert_eq!(config.worker.lease_extension_seconds, 43200);
        assert_eq!(config.queue.initial_visibility_seconds, 43200);
        assert_eq!(config.metadata_api.base_url, "http://localhost:8005");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_app_config_serialization() {
        let config = AppConfig::default();
        let serialized = config.to_toml().expect("Failed to serialize");
        let deserialized = AppConfig::from_toml(&serialized).expect("Failed to deserialize");

        assert_eq!(
            config.worker.early_failure_threshold,
            deserialized.worker.early_failure_threshold
        );
        assert_eq!(config.storage.url, deserialized.storage.url);
    }

    #[test]
    fn test_app_config_from_partial_toml() {
        let toml_str = r#"
[queue]
type = "in_memory"

[storage]
url = "memory://"

[worker]
worker_id = "test-worker"
early_failure_threshold = 2
per_file_timeout_seconds = 120
dependency_install_command = ["pip", "install", "-r"]

[observability]
log_level = "debug"
log_format = "pretty"
"#;

        let config = AppConfig::from_toml(toml_str).expect("Failed to parse TOML");
        assert_eq!(config.queue.r#type, QueueType::InMemory);
        assert_eq!(config.worker.worker_id, "test-worker");
        assert_eq!(config.worker.early_failure_threshold, 2);
        assert_eq!(config.worker.per_file_timeout_seconds, Some(120));
        assert_eq!(config.worker.heartbeat_interval_seconds, 60);
        assert_eq!(config.observability.log_level, LogLevel::Debug);
        assert_eq!(config.observability.log_format, OutputFormat::Pretty);
        assert_eq!(config.storage.analytical_prefix, "data_files/analytical");
    }

    #[test]
    fn test_app_config_rejects_invalid_values() {
        let toml_str = r#"
[worker]
early_failure_threshold = 0
"#;
        assert!(AppConfig::from_toml(toml_str).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "[metadata_api]\nbase_url = \"http://api.internal:9000\"\n\n[storage]\nurl = \"memory://\""
        )
        .expect("write config");

        let path = file.path().to_string_lossy().into_owned();
        let config = AppConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.metadata_api.base_url, "http://api.internal:9000");
        assert_eq!(config.storage.url, "memory://");
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(AppConfig::load(Some("/nonexistent/evaluator.toml")).is_err());
    }
}
