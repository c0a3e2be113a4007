use async_trait::async_trait;
use evaluator_errors::EvaluatorResult;
use std::time::Duration;

/// 一次出队得到的消息。确认时按值消费，保证每次迭代最多确认一次
#[derive(Debug)]
pub struct Delivery {
    pub receipt: String,
    pub body: String,
    pub receive_count: u32,
}

impl Delivery {
    pub fn lease(&self) -> Lease {
        Lease {
            receipt: self.receipt.clone(),
        }
    }
}

/// 续租所需的句柄，可在心跳任务间共享
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub receipt: String,
}

/// 至少一次投递、带可见性超时的队列
#[async_trait]
pub trait LeaseQueue: Send + Sync {
    async fn receive(&self, visibility: Duration) -> EvaluatorResult<Option<Delivery>>;
    async fn extend_visibility(&self, lease: &Lease, visibility: Duration) -> EvaluatorResult<()>;
    /// 删除未知或已删除的回执不报错
    async fn delete(&self, delivery: Delivery) -> EvaluatorResult<()>;
    async fn send(&self, body: &str) -> EvaluatorResult<String>;
}
