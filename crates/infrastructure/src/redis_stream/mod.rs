//! 基于 Redis Stream 的租约队列
//!
//! 消费者组负责投递。哈希表 `{stream}:deadlines` 记录每条消息的可见性截止时间，
//! `{stream}:receipts` 记录当前有效的回执 `{entry_id}:{投递次数}`。
//! 续租和删除只对当前回执生效，旧回执在消息被重新认领后自动失效。

pub mod connection_manager;

pub use connection_manager::RedisConnectionManager;

use async_trait::async_trait;
use evaluator_domain::ports::{Delivery, Lease, LeaseQueue};
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamReadReply};
use redis::Script;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

const BODY_FIELD: &str = "body";
const RECLAIM_BATCH: usize = 10;

// KEYS: receipts, deadlines  ARGV: entry id, receipt, deadline
const EXTEND_SCRIPT: &str = r"
if redis.call('HGET', KEYS[1], ARGV[1]) ~= ARGV[2] then return 0 end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[3])
return 1
";

// KEYS: stream, receipts, deadlines  ARGV: group, entry id, receipt
const DELETE_SCRIPT: &str = r"
if redis.call('HGET', KEYS[2], ARGV[2]) ~= ARGV[3] then return 0 end
redis.call('XACK', KEYS[1], ARGV[1], ARGV[2])
redis.call('XDEL', KEYS[1], ARGV[2])
redis.call('HDEL', KEYS[2], ARGV[2])
redis.call('HDEL', KEYS[3], ARGV[2])
return 1
";

fn receipt_for(entry_id: &str, delivery_count: u32) -> String {
    format!("{entry_id}:{delivery_count}")
}

fn entry_id_of(receipt: &str) -> EvaluatorResult<&str> {
    receipt
        .rsplit_once(':')
        .map(|(id, _)| id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EvaluatorError::MessageQueue(format!("无效的回执: {receipt}")))
}

/// 挂起消息是否可以被重新认领
///
/// 没有截止时间说明另一个消费者刚读到消息还没写入截止时间，
/// 此时只在空闲时长超过初始可见性后才认领。
fn lease_expired(
    deadline_ms: Option<i64>,
    idle_ms: u64,
    now_ms: i64,
    visibility: Duration,
) -> bool {
    match deadline_ms {
        Some(deadline) => deadline <= now_ms,
        None => u128::from(idle_ms) >= visibility.as_millis(),
    }
}

pub struct RedisStreamLeaseQueue {
    connection: RedisConnectionManager,
    stream: String,
    group: String,
    consumer: String,
    group_ready: OnceCell<()>,
    extend_script: Script,
    delete_script: Script,
}

impl RedisStreamLeaseQueue {
    pub async fn new(
        url: &str,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> EvaluatorResult<Self> {
        let connection = RedisConnectionManager::new(url).await?;
        info!(
            "Redis stream lease queue ready: stream={}, group={}, consumer={}",
            stream, group, consumer
        );
        Ok(Self {
            connection,
            stream: stream.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            group_ready: OnceCell::new(),
            extend_script: Script::new(EXTEND_SCRIPT),
            delete_script: Script::new(DELETE_SCRIPT),
        })
    }

    fn deadlines_key(&self) -> String {
        format!("{}:deadlines", self.stream)
    }

    fn receipts_key(&self) -> String {
        format!("{}:receipts", self.stream)
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn deadline_after(visibility: Duration) -> i64 {
        Self::now_ms() + i64::try_from(visibility.as_millis()).unwrap_or(i64::MAX / 2)
    }

    async fn ensure_consumer_group(&self) -> EvaluatorResult<()> {
        self.group_ready
            .get_or_try_init(|| async {
                let mut cmd = redis::cmd("XGROUP");
                cmd.arg("CREATE")
                    .arg(&self.stream)
                    .arg(&self.group)
                    .arg("0")
                    .arg("MKSTREAM");
                match self.connection.execute_command::<String>(&cmd).await {
                    Ok(_) => {
                        debug!("Created consumer group {}", self.group);
                        Ok(())
                    }
                    Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
                    Err(e) => Err(e),
                }
            })
            .await
            .map(|_| ())
    }

    /// 写入新回执和截止时间，返回投递
    async fn lease_entry(
        &self,
        entry: &StreamId,
        delivery_count: u32,
        visibility: Duration,
    ) -> EvaluatorResult<Delivery> {
        let body: String = entry.get(BODY_FIELD).ok_or_else(|| {
            EvaluatorError::MessageQueue(format!("Stream entry {} has no body field", entry.id))
        })?;
        let receipt = receipt_for(&entry.id, delivery_count);

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(self.receipts_key())
            .arg(&entry.id)
            .arg(&receipt)
            .ignore()
            .cmd("HSET")
            .arg(self.deadlines_key())
            .arg(&entry.id)
            .arg(Self::deadline_after(visibility))
            .ignore();
        let mut conn = self.connection.raw();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| EvaluatorError::MessageQueue(format!("Redis command failed: {e}")))?;

        Ok(Delivery {
            receipt,
            body,
            receive_count: delivery_count,
        })
    }

    /// 认领一条可见性已过期的挂起消息
    async fn reclaim_expired(&self, visibility: Duration) -> EvaluatorResult<Option<Delivery>> {
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(&self.stream)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg(RECLAIM_BATCH);
        let pending: StreamPendingCountReply = self.connection.execute_command(&cmd).await?;

        let now = Self::now_ms();
        for entry in pending.ids {
            let mut hget = redis::cmd("HGET");
            hget.arg(self.deadlines_key()).arg(&entry.id);
            let deadline: Option<i64> = self.connection.execute_command(&hget).await?;
            let idle_ms = entry.last_delivered_ms as u64;
            if !lease_expired(deadline, idle_ms, now, visibility) {
                continue;
            }

            // 以观察到的空闲时长作为下限，期间被别人认领过则认领失败
            let mut claim = redis::cmd("XCLAIM");
            claim
                .arg(&self.stream)
                .arg(&self.group)
                .arg(&self.consumer)
                .arg(idle_ms)
                .arg(&entry.id);
            let claimed: StreamClaimReply = self.connection.execute_command(&claim).await?;
            if let Some(stream_entry) = claimed.ids.first() {
                warn!(
                    "Reclaimed expired message {} (delivered {} times before)",
                    entry.id, entry.times_delivered
                );
                let count = u32::try_from(entry.times_delivered + 1).unwrap_or(u32::MAX);
                return Ok(Some(self.lease_entry(stream_entry, count, visibility).await?));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl LeaseQueue for RedisStreamLeaseQueue {
    async fn receive(&self, visibility: Duration) -> EvaluatorResult<Option<Delivery>> {
        self.ensure_consumer_group().await?;

        if let Some(delivery) = self.reclaim_expired(visibility).await? {
            return Ok(Some(delivery));
        }

        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("STREAMS")
            .arg(&self.stream)
            .arg(">");
        let reply: Option<StreamReadReply> = self.connection.execute_command(&cmd).await?;

        let Some(entry) = reply
            .into_iter()
            .flat_map(|r| r.keys)
            .flat_map(|k| k.ids)
            .next()
        else {
            return Ok(None);
        };

        Ok(Some(self.lease_entry(&entry, 1, visibility).await?))
    }

    async fn extend_visibility(&self, lease: &Lease, visibility: Duration) -> EvaluatorResult<()> {
        let entry_id = entry_id_of(&lease.receipt)?;
        let mut conn = self.connection.raw();
        let extended: i64 = self
            .extend_script
            .key(self.receipts_key())
            .key(self.deadlines_key())
            .arg(entry_id)
            .arg(&lease.receipt)
            .arg(Self::deadline_after(visibility))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| EvaluatorError::MessageQueue(format!("Redis command failed: {e}")))?;
        if extended == 0 {
            return Err(EvaluatorError::MessageQueue(format!(
                "回执已失效: {}",
                lease.receipt
            )));
        }
        Ok(())
    }

    async fn delete(&self, delivery: Delivery) -> EvaluatorResult<()> {
        let entry_id = entry_id_of(&delivery.receipt)?;
        let mut conn = self.connection.raw();
        let deleted: i64 = self
            .delete_script
            .key(&self.stream)
            .key(self.receipts_key())
            .key(self.deadlines_key())
            .arg(&self.group)
            .arg(entry_id)
            .arg(&delivery.receipt)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| EvaluatorError::MessageQueue(format!("Redis command failed: {e}")))?;
        if deleted == 0 {
            debug!("Receipt {} is no longer current, nothing deleted", delivery.receipt);
        } else {
            debug!("Deleted message {}", delivery.receipt);
        }
        Ok(())
    }

    async fn send(&self, body: &str) -> EvaluatorResult<String> {
        self.ensure_consumer_group().await?;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream).arg("*").arg(BODY_FIELD).arg(body);
        self.connection.execute_command(&cmd).await
    }
}
