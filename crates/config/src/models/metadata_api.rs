use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataApiConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for MetadataApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8005".to_string(),
            request_timeout_seconds: 30,
        }
    }
}

impl ConfigValidator for MetadataApiConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_url(&self.base_url, "metadata_api.base_url")?;
        ValidationUtils::validate_seconds(
            self.request_timeout_seconds,
            "metadata_api.request_timeout_seconds",
            600,
        )?;
        Ok(())
    }
}
