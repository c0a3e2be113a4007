use thiserror::Error;

/// 错误分类，决定作业级别的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 暂存失败：对象缺失、压缩包损坏、harness 文件缺失
    Staging,
    /// 提交契约失败：入口函数缺失、参数无法解析
    Contract,
    /// 单个文件执行失败，可恢复
    Execution,
    /// 早期失败熔断
    CircuitBreaker,
    /// 状态/结果/产物上报失败
    Reporting,
    /// 队列消息格式错误
    Message,
    /// worker 自身的基础设施错误
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum EvaluatorError {
    #[error("对象不存在: {key}")]
    ObjectNotFound { key: String },
    #[error("对象存储错误: {0}")]
    Storage(String),
    #[error("分析 {analysis_id} 缺少 harness 文件: {file}")]
    MissingHarnessFile { analysis_id: i64, file: String },
    #[error("缺少{kind}数据文件: {file_name}")]
    MissingDataFile { kind: String, file_name: String },
    #[error("数据文件 {file_name} 无法使用: {reason}")]
    InvalidDataFile { file_name: String, reason: String },
    #[error("无效的分析配置: {0}")]
    InvalidAnalysisConfig(String),
    #[error("依赖安装失败: {0}")]
    DependencyInstall(String),
    #[error("提交产物不存在: {artifact}")]
    SubmissionArtifactMissing { artifact: String },
    #[error("压缩包格式错误: {0}")]
    ArchiveMalformed(String),
    #[error("提交中未找到唯一的源文件: {0}")]
    SubmissionSourceMissing(String),
    #[error("提交中未找到入口函数: {function}")]
    EntryPointNotFound { function: String },
    #[error("参数解析失败: {0}")]
    ParameterIntrospection(String),
    #[error("提交函数执行失败: {0}")]
    InvocationFailed(String),
    #[error("提交函数执行超时: {seconds}s")]
    InvocationTimeout { seconds: u64 },
    #[error("输出形状不匹配: 期望 {expected}, 实际 {actual}")]
    OutputShapeMismatch { expected: usize, actual: usize },
    #[error("早期失败过多: 前 {threshold} 个文件中失败 {failures} 个")]
    TooManyEarlyFailures { failures: usize, threshold: usize },
    #[error("没有任何文件评估成功")]
    NoSuccessfulResults,
    #[error("报告生成失败: {0}")]
    Report(String),
    #[error("元数据服务错误: {0}")]
    MetadataApi(String),
    #[error("元数据服务返回 HTTP {status}: {url}")]
    HttpStatus { status: u16, url: String },
    #[error("无效的队列消息: {0}")]
    MalformedMessage(String),
    #[error("消息队列错误: {0}")]
    MessageQueue(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("IO错误: {0}")]
    Io(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type EvaluatorResult<T> = Result<T, EvaluatorError>;

impl EvaluatorError {
    pub fn object_not_found<S: Into<String>>(key: S) -> Self {
        Self::ObjectNotFound { key: key.into() }
    }
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }
    pub fn invocation<S: Into<String>>(msg: S) -> Self {
        Self::InvocationFailed(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn malformed_message<S: Into<String>>(msg: S) -> Self {
        Self::MalformedMessage(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EvaluatorError::ObjectNotFound { .. }
            | EvaluatorError::Storage(_)
            | EvaluatorError::MissingHarnessFile { .. }
            | EvaluatorError::MissingDataFile { .. }
            | EvaluatorError::InvalidDataFile { .. }
            | EvaluatorError::InvalidAnalysisConfig(_)
            | EvaluatorError::DependencyInstall(_)
            | EvaluatorError::SubmissionArtifactMissing { .. }
            | EvaluatorError::ArchiveMalformed(_)
            | EvaluatorError::SubmissionSourceMissing(_) => ErrorKind::Staging,
            EvaluatorError::EntryPointNotFound { .. }
            | EvaluatorError::ParameterIntrospection(_) => ErrorKind::Contract,
            EvaluatorError::InvocationFailed(_)
            | EvaluatorError::InvocationTimeout { .. }
            | EvaluatorError::OutputShapeMismatch { .. } => ErrorKind::Execution,
            EvaluatorError::TooManyEarlyFailures { .. } => ErrorKind::CircuitBreaker,
            EvaluatorError::Report(_)
            | EvaluatorError::MetadataApi(_)
            | EvaluatorError::HttpStatus { .. } => ErrorKind::Reporting,
            EvaluatorError::MalformedMessage(_) => ErrorKind::Message,
            EvaluatorError::MessageQueue(_)
            | EvaluatorError::Serialization(_)
            | EvaluatorError::Configuration(_)
            | EvaluatorError::Io(_)
            | EvaluatorError::NoSuccessfulResults
            | EvaluatorError::Internal(_) => ErrorKind::Infrastructure,
        }
    }

    /// 单文件级错误：计入失败数后继续处理下一个文件
    pub fn is_per_file_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Execution
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EvaluatorError::ObjectNotFound { .. }
                | EvaluatorError::HttpStatus { status: 404, .. }
        )
    }
}

impl From<serde_json::Error> for EvaluatorError {
    fn from(err: serde_json::Error) -> Self {
        EvaluatorError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for EvaluatorError {
    fn from(err: std::io::Error) -> Self {
        EvaluatorError::Io(err.to_string())
    }
}

impl From<anyhow::Error> for EvaluatorError {
    fn from(err: anyhow::Error) -> Self {
        EvaluatorError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
