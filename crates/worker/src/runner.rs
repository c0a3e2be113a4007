use std::path::Path;

use async_trait::async_trait;
use evaluator_domain::{JobMessage, JobResult};
use evaluator_errors::EvaluatorResult;

use crate::components::{EvaluationEngine, LoadedHarness, ReportBuilder, SubmissionLoader};

/// 单个任务的上下文，由任务循环创建并在任务结束时丢弃
#[derive(Debug, Clone)]
pub struct JobContext {
    pub message: JobMessage,
    pub harness: LoadedHarness,
}

/// harness 的执行入口
#[async_trait]
pub trait HarnessRunner: Send + Sync {
    async fn run(
        &self,
        job: &JobContext,
        working_dir: &Path,
        results_dir: &Path,
    ) -> EvaluatorResult<JobResult>;
}

/// 加载提交、逐文件评估、生成报告
pub struct StandardRunner {
    submissions: SubmissionLoader,
    engine: EvaluationEngine,
}

impl StandardRunner {
    pub fn new(submissions: SubmissionLoader, engine: EvaluationEngine) -> Self {
        Self {
            submissions,
            engine,
        }
    }
}

#[async_trait]
impl HarnessRunner for StandardRunner {
    async fn run(
        &self,
        job: &JobContext,
        working_dir: &Path,
        results_dir: &Path,
    ) -> EvaluatorResult<JobResult> {
        let submission = self
            .submissions
            .load(
                &job.message,
                &job.harness.definition.function_name,
                working_dir,
            )
            .await?;

        let outcome = self.engine.evaluate(&job.harness, &submission).await?;
        ReportBuilder::new(results_dir)
            .build(&job.harness, &submission, &outcome)
            .await
    }
}
