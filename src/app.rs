use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use evaluator_config::AppConfig;
use evaluator_domain::{JobMessage, LeaseQueue, MetadataApi, ObjectStager};
use evaluator_infrastructure::{HttpMetadataClient, MessageQueueFactory, ObjectStoreStager};
use evaluator_worker::{
    DependencyInstaller, EvaluationEngine, HarnessLoader, JobLoop, JobLoopSettings,
    PredictorRegistry, StandardRunner, SubmissionLoader,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// 组装好的 worker 进程
pub struct Application {
    queue: Arc<dyn LeaseQueue>,
    job_loop: JobLoop,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化 worker {}", config.worker.worker_id);

        let queue = MessageQueueFactory::create(&config.queue, &config.worker.worker_id)
            .await
            .context("创建消息队列失败")?;
        let stager = ObjectStoreStager::from_url(&config.storage.url)
            .with_context(|| format!("创建对象存储失败: {}", config.storage.url))?;
        let metadata =
            HttpMetadataClient::new(&config.metadata_api).context("创建元数据客户端失败")?;

        Ok(Self::with_components(
            &config,
            queue,
            Arc::new(metadata),
            Arc::new(stager),
            PredictorRegistry::new(),
        ))
    }

    pub fn with_components(
        config: &AppConfig,
        queue: Arc<dyn LeaseQueue>,
        metadata: Arc<dyn MetadataApi>,
        stager: Arc<dyn ObjectStager>,
        registry: PredictorRegistry,
    ) -> Self {
        let worker = &config.worker;
        let installer = DependencyInstaller::new(worker.dependency_install_command.clone());

        let harness_loader = HarnessLoader::new(
            Arc::clone(&stager),
            Arc::clone(&metadata),
            config.storage.clone(),
            installer.clone(),
        );
        let submissions = SubmissionLoader::new(
            Arc::clone(&stager),
            config.storage.clone(),
            registry,
            installer,
        );
        let engine = EvaluationEngine::new(
            worker.early_failure_threshold,
            worker.per_file_timeout_seconds.map(Duration::from_secs),
        );
        let runner = Arc::new(StandardRunner::new(submissions, engine));

        let job_loop = JobLoop::new(
            Arc::clone(&queue),
            metadata,
            stager,
            harness_loader,
            runner,
            config.storage.clone(),
            JobLoopSettings::from_config(&config.queue, worker),
        );
        Self { queue, job_loop }
    }

    /// 校验并发布一条任务消息，返回消息 ID
    pub async fn enqueue_file(&self, path: &Path) -> Result<String> {
        let body = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("读取任务消息失败: {}", path.display()))?;
        let message = JobMessage::parse(&body).context("任务消息格式错误")?;
        let id = self
            .queue
            .send(body.trim())
            .await
            .context("发布任务消息失败")?;
        info!(
            "已发布任务消息 {} (analysis {}, submission {})",
            id, message.analysis_id, message.submission_id
        );
        Ok(id)
    }

    pub async fn run(&self, shutdown: CancellationToken, once: bool) -> Result<()> {
        self.job_loop
            .run(shutdown, once)
            .await
            .context("任务循环异常退出")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evaluator_config::QueueConfig;
    use evaluator_domain::SubmissionStatus;
    use evaluator_infrastructure::InMemoryLeaseQueue;
    use evaluator_testing_utils::{job_message, InMemoryMetadataApi};
    use tempfile::TempDir;

    fn test_config(work_dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.queue = QueueConfig::in_memory_default();
        config.storage.url = "memory://".to_string();
        config.worker.work_dir = work_dir.to_string_lossy().into_owned();
        config
    }

    #[tokio::test]
    async fn test_enqueue_then_run_once() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let queue = Arc::new(InMemoryLeaseQueue::new());
        let metadata = Arc::new(InMemoryMetadataApi::new());
        let app = Application::with_components(
            &config,
            queue.clone(),
            metadata.clone(),
            Arc::new(ObjectStoreStager::memory()),
            PredictorRegistry::new(),
        );

        let message_path = dir.path().join("job.json");
        std::fs::write(&message_path, job_message(5, 7, 1, "submission.zip")).unwrap();
        app.enqueue_file(&message_path).await.unwrap();
        assert_eq!(queue.len().await, 1);

        // 没有暂存 harness，任务失败但消息被确认
        app.run(CancellationToken::new(), true).await.unwrap();
        assert!(queue.is_empty().await);
        assert_eq!(
            metadata.statuses_for(7),
            vec![SubmissionStatus::Running, SubmissionStatus::Failed]
        );
    }

    #[tokio::test]
    async fn test_enqueue_rejects_malformed_message() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let queue = Arc::new(InMemoryLeaseQueue::new());
        let app = Application::with_components(
            &config,
            queue.clone(),
            Arc::new(InMemoryMetadataApi::new()),
            Arc::new(ObjectStoreStager::memory()),
            PredictorRegistry::new(),
        );

        let message_path = dir.path().join("job.json");
        std::fs::write(&message_path, r#"{"analysis_id": 1}"#).unwrap();
        assert!(app.enqueue_file(&message_path).await.is_err());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancelled_loop_exits_immediately() {
        let dir = TempDir::new().unwrap();
        let config = test_config(dir.path());
        let app = Application::new(config).await.unwrap();
        let token = CancellationToken::new();
        token.cancel();
        app.run(token, false).await.unwrap();
    }
}
