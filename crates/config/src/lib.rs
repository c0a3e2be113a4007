pub mod models;
pub mod validation;

pub use models::{
    AppConfig, LogLevel, MetadataApiConfig, ObservabilityConfig, OutputFormat, QueueConfig,
    QueueType, StorageConfig, WorkerConfig,
};
pub use validation::{ConfigValidator, ValidationUtils};

pub type ConfigResult<T> = Result<T, ConfigError>;

/// 配置校验失败
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("配置校验失败: {0}")]
    Validation(String),
}

impl From<ConfigError> for evaluator_errors::EvaluatorError {
    fn from(err: ConfigError) -> Self {
        evaluator_errors::EvaluatorError::Configuration(err.to_string())
    }
}
