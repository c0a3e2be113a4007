use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// 每个作业在此目录下创建独立的工作目录
    pub work_dir: String,
    pub heartbeat_interval_seconds: u64,
    /// 每次续租时设置的可见性窗口
    pub lease_extension_seconds: u64,
    pub early_failure_threshold: usize,
    pub per_file_timeout_seconds: Option<u64>,
    pub keep_work_dir: bool,
    /// 例如 `["pip", "install", "-r"]`，requirements 文件路径追加在末尾
    pub dependency_install_command: Option<Vec<String>>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "evaluator-001".to_string(),
            work_dir: std::env::temp_dir()
                .join("evaluator")
                .to_string_lossy()
                .into_owned(),
            heartbeat_interval_seconds: 60,
            lease_extension_seconds: 43200,
            early_failure_threshold: 4,
            per_file_timeout_seconds: None,
            keep_work_dir: false,
            dependency_install_command: None,
        }
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.worker_id, "worker.worker_id")?;
        ValidationUtils::validate_not_empty(&self.work_dir, "worker.work_dir")?;
        ValidationUtils::validate_seconds(
            self.heartbeat_interval_seconds,
            "worker.heartbeat_interval_seconds",
            3600,
        )?;
        ValidationUtils::validate_seconds(
            self.lease_extension_seconds,
            "worker.lease_extension_seconds",
            43200,
        )?;
        if self.heartbeat_interval_seconds >= self.lease_extension_seconds {
            return Err(crate::ConfigError::Validation(
                "worker.heartbeat_interval_seconds must be shorter than worker.lease_extension_seconds"
                    .to_string(),
            ));
        }
        ValidationUtils::validate_count(
            self.early_failure_threshold,
            "worker.early_failure_threshold",
            100,
        )?;
        if let Some(timeout) = self.per_file_timeout_seconds {
            ValidationUtils::validate_seconds(timeout, "worker.per_file_timeout_seconds", 86400)?;
        }
        if let Some(command) = &self.dependency_install_command {
            if command.is_empty() {
                return Err(crate::ConfigError::Validation(
                    "worker.dependency_install_command cannot be an empty list".to_string(),
                ));
            }
        }
        Ok(())
    }
}
