use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use evaluator_config::{QueueConfig, StorageConfig, WorkerConfig};
use evaluator_domain::{
    Delivery, JobMessage, JobResult, LeaseQueue, MetadataApi, ObjectStager, SubmissionStatus,
};
use evaluator_errors::{ErrorKind, EvaluatorError, EvaluatorResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::components::{HarnessLoader, LeaseKeeper};
use crate::runner::{HarnessRunner, JobContext};

/// 一次循环迭代的结果
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    /// 队列中没有消息
    Idle,
    /// 消息无法解析，已删除
    Rejected,
    Finished { submission_id: i64 },
    Failed { submission_id: i64, kind: ErrorKind },
}

#[derive(Debug, Clone)]
pub struct JobLoopSettings {
    pub work_dir: PathBuf,
    pub keep_work_dir: bool,
    pub initial_visibility: Duration,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub lease_extension: Duration,
}

impl JobLoopSettings {
    pub fn from_config(queue: &QueueConfig, worker: &WorkerConfig) -> Self {
        Self {
            work_dir: PathBuf::from(&worker.work_dir),
            keep_work_dir: worker.keep_work_dir,
            initial_visibility: Duration::from_secs(queue.initial_visibility_seconds),
            poll_interval: Duration::from_secs(queue.poll_interval_seconds),
            heartbeat_interval: Duration::from_secs(worker.heartbeat_interval_seconds),
            lease_extension: Duration::from_secs(worker.lease_extension_seconds),
        }
    }
}

pub struct JobLoop {
    queue: Arc<dyn LeaseQueue>,
    metadata: Arc<dyn MetadataApi>,
    stager: Arc<dyn ObjectStager>,
    harness_loader: HarnessLoader,
    runner: Arc<dyn HarnessRunner>,
    storage: StorageConfig,
    settings: JobLoopSettings,
}

impl JobLoop {
    pub fn new(
        queue: Arc<dyn LeaseQueue>,
        metadata: Arc<dyn MetadataApi>,
        stager: Arc<dyn ObjectStager>,
        harness_loader: HarnessLoader,
        runner: Arc<dyn HarnessRunner>,
        storage: StorageConfig,
        settings: JobLoopSettings,
    ) -> Self {
        Self {
            queue,
            metadata,
            stager,
            harness_loader,
            runner,
            storage,
            settings,
        }
    }

    /// 持续处理消息直到收到关闭信号；`once` 时最多处理一条消息
    pub async fn run(&self, shutdown: CancellationToken, once: bool) -> EvaluatorResult<()> {
        info!("Job loop started");
        while !shutdown.is_cancelled() {
            let outcome = match self.run_once().await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Job loop iteration failed: {}", e);
                    if once {
                        return Err(e);
                    }
                    IterationOutcome::Idle
                }
            };
            if once {
                break;
            }
            if outcome == IterationOutcome::Idle {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.settings.poll_interval) => {}
                }
            }
        }
        info!("Job loop stopped");
        Ok(())
    }

    pub async fn run_once(&self) -> EvaluatorResult<IterationOutcome> {
        let Some(delivery) = self.queue.receive(self.settings.initial_visibility).await? else {
            debug!("No message available");
            return Ok(IterationOutcome::Idle);
        };

        let message = match JobMessage::parse(&delivery.body) {
            Ok(message) => message,
            Err(e) => {
                self.reject(delivery, &e).await;
                return Ok(IterationOutcome::Rejected);
            }
        };

        let span = info_span!(
            "job",
            submission_id = message.submission_id,
            analysis_id = message.analysis_id
        );
        self.handle(delivery, message).instrument(span).await
    }

    async fn handle(
        &self,
        delivery: Delivery,
        message: JobMessage,
    ) -> EvaluatorResult<IterationOutcome> {
        info!(
            "Received job (attempt {}) for artifact {}",
            delivery.receive_count, message.submission_artifact_name
        );
        let mut keeper = LeaseKeeper::new(
            Arc::clone(&self.queue),
            self.settings.heartbeat_interval,
            self.settings.lease_extension,
        );
        keeper.start(delivery.lease());

        let work_dir = self.settings.work_dir.join(format!(
            "analysis_{}_submission_{}_{}",
            message.analysis_id,
            message.submission_id,
            chrono::Utc::now().timestamp_millis()
        ));
        let result = self.process(&message, &work_dir).await;

        let outcome = match result {
            Ok(job_result) => {
                info!(
                    "Job finished: {}/{} files failed, success rate {:.2}",
                    job_result.failed_files, job_result.total_files, job_result.success_rate
                );
                self.set_status(&message, SubmissionStatus::Finished).await;
                self.publish(&message, &job_result, &work_dir.join("results")).await;
                metrics::counter!("evaluator_jobs_total", "outcome" => "finished").increment(1);
                IterationOutcome::Finished {
                    submission_id: message.submission_id,
                }
            }
            Err(e) => {
                error!("Job failed ({:?}): {}", e.kind(), e);
                self.set_status(&message, SubmissionStatus::Failed).await;
                metrics::counter!("evaluator_jobs_total", "outcome" => "failed").increment(1);
                IterationOutcome::Failed {
                    submission_id: message.submission_id,
                    kind: e.kind(),
                }
            }
        };

        // 续租任务必须在删除消息前退出
        keeper.stop().await;
        let acked = self.queue.delete(delivery).await;
        self.cleanup(&work_dir).await;
        acked?;
        Ok(outcome)
    }

    async fn process(&self, message: &JobMessage, work_dir: &Path) -> EvaluatorResult<JobResult> {
        tokio::fs::create_dir_all(work_dir).await?;
        self.set_status(message, SubmissionStatus::Running).await;

        let harness = self.harness_loader.load(message.analysis_id, work_dir).await?;
        let job = JobContext {
            message: message.clone(),
            harness,
        };

        let job_result = self
            .runner
            .run(&job, work_dir, &work_dir.join("results"))
            .await?;
        for warning in &job_result.warnings {
            debug!("Report warning: {}", warning);
        }
        Ok(job_result)
    }

    /// 上报结果并上传产物，失败只记录警告
    async fn publish(&self, message: &JobMessage, job_result: &JobResult, results_dir: &Path) {
        if let Err(e) = self
            .metadata
            .update_submission_result(
                message.analysis_id,
                message.submission_id,
                &job_result.public_metrics,
            )
            .await
        {
            warn!("Failed to post submission results: {}", e);
        }

        let prefix = self
            .storage
            .results_prefix(message.user_id, message.submission_id);
        match self.stager.push_dir(results_dir, &prefix).await {
            Ok(keys) => info!("Uploaded {} result artifacts to {}", keys.len(), prefix),
            Err(e) => warn!("Failed to upload result artifacts: {}", e),
        }
    }

    async fn reject(&self, delivery: Delivery, reason: &EvaluatorError) {
        warn!("Rejecting message {}: {}", delivery.receipt, reason);
        metrics::counter!("evaluator_jobs_total", "outcome" => "rejected").increment(1);

        if let Some((analysis_id, submission_id)) = JobMessage::salvage_ids(&delivery.body) {
            if let Err(e) = self
                .metadata
                .update_submission_status(analysis_id, submission_id, SubmissionStatus::Failed)
                .await
            {
                warn!("Failed to mark submission {} as failed: {}", submission_id, e);
            }
        }
        if let Err(e) = self.queue.delete(delivery).await {
            error!("Failed to delete rejected message: {}", e);
        }
    }

    async fn set_status(&self, message: &JobMessage, status: SubmissionStatus) {
        if let Err(e) = self
            .metadata
            .update_submission_status(message.analysis_id, message.submission_id, status)
            .await
        {
            warn!("Failed to set submission status to {}: {}", status, e);
        }
    }

    async fn cleanup(&self, work_dir: &Path) {
        if self.settings.keep_work_dir {
            info!("Keeping work directory {}", work_dir.display());
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove work directory {}: {}", work_dir.display(), e);
            }
        }
    }
}
