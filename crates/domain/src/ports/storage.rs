use async_trait::async_trait;
use evaluator_errors::EvaluatorResult;
use std::path::{Path, PathBuf};

/// 对象存储与本地工作目录之间的搬运
#[async_trait]
pub trait ObjectStager: Send + Sync {
    /// 对象不存在时返回 `ObjectNotFound`，传输失败返回 `Storage`
    async fn fetch(&self, key: &str, local_path: &Path) -> EvaluatorResult<PathBuf>;
    async fn fetch_bytes(&self, key: &str) -> EvaluatorResult<Vec<u8>>;
    async fn push(&self, local_path: &Path, key: &str) -> EvaluatorResult<()>;
    /// 上传目录下所有普通文件，返回写入的对象键
    async fn push_dir(&self, local_dir: &Path, prefix: &str) -> EvaluatorResult<Vec<String>>;
    async fn list(&self, prefix: &str) -> EvaluatorResult<Vec<String>>;
}
