use std::sync::Arc;
use tracing::{debug, info};

use evaluator_config::{QueueConfig, QueueType};
use evaluator_domain::ports::LeaseQueue;
use evaluator_errors::EvaluatorResult;

use crate::{InMemoryLeaseQueue, RedisStreamLeaseQueue};

pub struct MessageQueueFactory;

impl MessageQueueFactory {
    pub async fn create(
        config: &QueueConfig,
        consumer_id: &str,
    ) -> EvaluatorResult<Arc<dyn LeaseQueue>> {
        debug!("Creating lease queue with type: {:?}", config.r#type);

        match config.r#type {
            QueueType::InMemory => {
                info!("Initializing in-memory lease queue");
                Ok(Arc::new(InMemoryLeaseQueue::new()))
            }
            QueueType::RedisStream => {
                info!("Initializing Redis stream lease queue at {}", config.url);
                let queue = RedisStreamLeaseQueue::new(
                    &config.url,
                    &config.queue_name,
                    &config.consumer_group,
                    consumer_id,
                )
                .await?;
                Ok(Arc::new(queue))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_create_in_memory_queue() {
        let config = QueueConfig::in_memory_default();
        let queue = MessageQueueFactory::create(&config, "worker-1").await.unwrap();
        queue.send("{}").await.unwrap();
        let delivery = queue.receive(Duration::from_secs(5)).await.unwrap();
        assert!(delivery.is_some());
    }
}
