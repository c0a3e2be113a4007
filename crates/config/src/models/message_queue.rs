use crate::validation::{ConfigValidator, ValidationUtils};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    InMemory,
    RedisStream,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub r#type: QueueType,
    pub url: String,
    pub queue_name: String,
    pub consumer_group: String,
    /// 首次接收消息时的可见性超时
    pub initial_visibility_seconds: u64,
    /// 队列为空时的轮询间隔
    pub poll_interval_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            r#type: QueueType::RedisStream,
            url: "redis://localhost:6379".to_string(),
            queue_name: "valhub_submission_queue".to_string(),
            consumer_group: "evaluator_workers".to_string(),
            initial_visibility_seconds: 43200,
            poll_interval_seconds: 20,
        }
    }
}

impl QueueConfig {
    pub fn in_memory_default() -> Self {
        Self {
            r#type: QueueType::InMemory,
            url: "".to_string(), // 内存队列不需要URL
            poll_interval_seconds: 1,
            ..Self::default()
        }
    }
}

impl ConfigValidator for QueueConfig {
    fn validate(&self) -> crate::ConfigResult<()> {
        ValidationUtils::validate_not_empty(&self.queue_name, "queue.queue_name")?;
        ValidationUtils::validate_seconds(
            self.initial_visibility_seconds,
            "queue.initial_visibility_seconds",
            43200,
        )?;
        ValidationUtils::validate_seconds(
            self.poll_interval_seconds,
            "queue.poll_interval_seconds",
            3600,
        )?;

        if self.r#type == QueueType::RedisStream {
            ValidationUtils::validate_url(&self.url, "queue.url")?;
            if !self.url.starts_with("redis://") && !self.url.starts_with("rediss://") {
                return Err(crate::ConfigError::Validation(
                    "Redis stream queue requires a redis:// or rediss:// URL".to_string(),
                ));
            }
            ValidationUtils::validate_not_empty(&self.consumer_group, "queue.consumer_group")?;
        }

        Ok(())
    }
}
