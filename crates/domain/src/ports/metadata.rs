use crate::entities::{FileMetadata, SubmissionStatus, SystemMetadata};
use async_trait::async_trait;
use evaluator_errors::EvaluatorResult;

/// 元数据服务接口
#[async_trait]
pub trait MetadataApi: Send + Sync {
    async fn system_metadata(&self, system_id: i64) -> EvaluatorResult<SystemMetadata>;
    async fn file_metadata(&self, file_id: i64) -> EvaluatorResult<FileMetadata>;
    async fn update_submission_status(
        &self,
        analysis_id: i64,
        submission_id: i64,
        status: SubmissionStatus,
    ) -> EvaluatorResult<()>;
    async fn update_submission_result(
        &self,
        analysis_id: i64,
        submission_id: i64,
        public_metrics: &serde_json::Map<String, serde_json::Value>,
    ) -> EvaluatorResult<()>;
}
