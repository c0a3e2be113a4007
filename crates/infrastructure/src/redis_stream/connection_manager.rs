use evaluator_errors::{EvaluatorError, EvaluatorResult};
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, error};

/// 对 `redis::aio::ConnectionManager` 的薄封装，统一错误映射
#[derive(Clone)]
pub struct RedisConnectionManager {
    manager: ConnectionManager,
}

impl RedisConnectionManager {
    pub async fn new(url: &str) -> EvaluatorResult<Self> {
        let client = Client::open(url).map_err(|e| {
            EvaluatorError::MessageQueue(format!("Failed to create Redis client: {e}"))
        })?;
        let manager = ConnectionManager::new(client).await.map_err(|e| {
            EvaluatorError::MessageQueue(format!("Failed to connect to Redis: {e}"))
        })?;

        let connection = Self { manager };
        connection.ping().await?;
        debug!("Successfully connected to Redis");
        Ok(connection)
    }

    pub fn raw(&self) -> ConnectionManager {
        self.manager.clone()
    }

    pub async fn execute_command<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
    ) -> EvaluatorResult<T> {
        let mut conn = self.manager.clone();
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| EvaluatorError::MessageQueue(format!("Redis command failed: {e}")))
    }

    pub async fn ping(&self) -> EvaluatorResult<()> {
        let response: String = self.execute_command(&redis::cmd("PING")).await?;
        if response == "PONG" {
            Ok(())
        } else {
            let error_msg = format!("Unexpected PING response: {response}");
            error!("{}", error_msg);
            Err(EvaluatorError::MessageQueue(error_msg))
        }
    }
}
