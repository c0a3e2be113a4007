use async_trait::async_trait;
use evaluator_domain::ports::{Delivery, Lease, LeaseQueue};
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// 内存租约队列
///
/// 适用于嵌入式部署和测试场景。语义与云端队列一致：
/// 出队后的消息在可见性超时内对其他消费者不可见，超时后重新投递。
#[derive(Debug, Default)]
pub struct InMemoryLeaseQueue {
    state: Mutex<QueueState>,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<QueuedMessage>,
    next_id: u64,
}

#[derive(Debug)]
struct QueuedMessage {
    id: u64,
    body: String,
    visible_at: Instant,
    receive_count: u32,
    /// 每次投递生成新回执，旧回执随之失效
    receipt: Option<String>,
}

impl InMemoryLeaseQueue {
    pub fn new() -> Self {
        info!("Creating in-memory lease queue");
        Self::default()
    }

    /// 队列中的消息总数（包括处于租约中的）
    pub async fn len(&self) -> usize {
        self.state.lock().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl LeaseQueue for InMemoryLeaseQueue {
    async fn receive(&self, visibility: Duration) -> EvaluatorResult<Option<Delivery>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let Some(message) = state.messages.iter_mut().find(|m| m.visible_at <= now) else {
            return Ok(None);
        };

        message.receive_count += 1;
        message.visible_at = now + visibility;
        let receipt = format!("{}-{}", message.id, message.receive_count);
        message.receipt = Some(receipt.clone());

        debug!(
            "Received message {} (attempt {})",
            message.id, message.receive_count
        );
        Ok(Some(Delivery {
            receipt,
            body: message.body.clone(),
            receive_count: message.receive_count,
        }))
    }

    async fn extend_visibility(&self, lease: &Lease, visibility: Duration) -> EvaluatorResult<()> {
        let mut state = self.state.lock().await;
        let message = state
            .messages
            .iter_mut()
            .find(|m| m.receipt.as_deref() == Some(lease.receipt.as_str()))
            .ok_or_else(|| {
                EvaluatorError::MessageQueue(format!("回执已失效: {}", lease.receipt))
            })?;
        message.visible_at = Instant::now() + visibility;
        Ok(())
    }

    async fn delete(&self, delivery: Delivery) -> EvaluatorResult<()> {
        let mut state = self.state.lock().await;
        let before = state.messages.len();
        state
            .messages
            .retain(|m| m.receipt.as_deref() != Some(delivery.receipt.as_str()));
        if state.messages.len() == before {
            debug!("Receipt {} not found, nothing deleted", delivery.receipt);
        }
        Ok(())
    }

    async fn send(&self, body: &str) -> EvaluatorResult<String> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.messages.push_back(QueuedMessage {
            id,
            body: body.to_string(),
            visible_at: Instant::now(),
            receive_count: 0,
            receipt: None,
        });
        Ok(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_receive_and_delete() {
        let queue = InMemoryLeaseQueue::new();
        queue.send("first").await.unwrap();
        queue.send("second").await.unwrap();

        let delivery = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(delivery.body, "first");
        assert_eq!(delivery.receive_count, 1);
        queue.delete(delivery).await.unwrap();

        let delivery = queue.receive(Duration::from_secs(30)).await.unwrap().unwrap();
        assert_eq!(delivery.body, "second");
        queue.delete(delivery).await.unwrap();

        assert!(queue.is_empty().await);
        assert!(queue.receive(Duration::from_secs(30)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_after_visibility_timeout() {
        let queue = InMemoryLeaseQueue::new();
        queue.send("job").await.unwrap();

        let first = queue.receive(Duration::from_secs(60)).await.unwrap().unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(queue.receive(Duration::from_secs(60)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = queue.receive(Duration::from_secs(60)).await.unwrap().unwrap();
        assert_eq!(second.body, "job");
        assert_eq!(second.receive_count, 2);
        assert_ne!(first.receipt, second.receipt);

        // 过期回执的删除是空操作
        queue.delete(first).await.unwrap();
        assert_eq!(queue.len().await, 1);
        queue.delete(second).await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extend_visibility_keeps_message_hidden() {
        let queue = InMemoryLeaseQueue::new();
        queue.send("job").await.unwrap();
        let delivery = queue.receive(Duration::from_secs(10)).await.unwrap().unwrap();

        tokio::time::advance(Duration::from_secs(8)).await;
        queue
            .extend_visibility(&delivery.lease(), Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(8)).await;
        assert!(queue.receive(Duration::from_secs(10)).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(queue.receive(Duration::from_secs(10)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_extend_unknown_receipt_fails() {
        let queue = InMemoryLeaseQueue::new();
        let lease = Lease {
            receipt: "missing".to_string(),
        };
        assert!(queue
            .extend_visibility(&lease, Duration::from_secs(10))
            .await
            .is_err());
    }
}
