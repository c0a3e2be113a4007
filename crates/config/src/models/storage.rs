use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

/// 对象存储布局
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory://`, `file:///path` 或 `s3://bucket/prefix`
    pub url: String,
    pub evaluation_scripts_prefix: String,
    pub analytical_prefix: String,
    pub ground_truth_prefix: String,
    pub submissions_prefix: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: "file:///var/lib/evaluator/blob".to_string(),
            evaluation_scripts_prefix: "evaluation_scripts".to_string(),
            analytical_prefix: "data_files/analytical".to_string(),
            ground_truth_prefix: "data_files/ground_truth".to_string(),
            submissions_prefix: "submission_files".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn harness_prefix(&self, analysis_id: i64) -> String {
        format!("{}/{}", self.evaluation_scripts_prefix, analysis_id)
    }

    pub fn submission_prefix(&self, user_id: i64, submission_id: i64) -> String {
        format!(
            "{}/submission_user_{}/submission_{}",
            self.submissions_prefix, user_id, submission_id
        )
    }

    pub fn results_prefix(&self, user_id: i64, submission_id: i64) -> String {
        format!("{}/results", self.submission_prefix(user_id, submission_id))
    }

    pub fn analytical_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.analytical_prefix, file_name)
    }

    pub fn ground_truth_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.ground_truth_prefix, file_name)
    }
}

impl ConfigValidator for StorageConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_url(&self.url, "storage.url")?;
        let scheme = self.url.split("://").next().unwrap_or_default();
        if !matches!(scheme, "memory" | "file" | "s3") {
            return Err(crate::ConfigError::Validation(format!(
                "Unsupported storage scheme: {scheme}. Valid options: memory, file, s3"
            )));
        }
        ValidationUtils::validate_prefix(
            &self.evaluation_scripts_prefix,
            "storage.evaluation_scripts_prefix",
        )?;
        ValidationUtils::validate_prefix(&self.analytical_prefix, "storage.analytical_prefix")?;
        ValidationUtils::validate_prefix(&self.ground_truth_prefix, "storage.ground_truth_prefix")?;
        ValidationUtils::validate_prefix(&self.submissions_prefix, "storage.submissions_prefix")?;
        Ok(())
    }
}
