//! 测试辅助工具

use evaluator_domain::ObjectStager;
use evaluator_errors::EvaluatorResult;
use serde_json::json;

/// 通过临时文件把字节写入对象存储
pub async fn stage_bytes(
    stager: &dyn ObjectStager,
    key: &str,
    bytes: &[u8],
) -> EvaluatorResult<()> {
    let scratch = tempfile::tempdir()?;
    let path = scratch.path().join("object");
    tokio::fs::write(&path, bytes).await?;
    stager.push(&path, key).await
}

pub fn job_message(analysis_id: i64, submission_id: i64, user_id: i64, artifact: &str) -> String {
    json!({
        "analysis_id": analysis_id,
        "submission_id": submission_id,
        "user_id": user_id,
        "submission_filename": artifact,
    })
    .to_string()
}
