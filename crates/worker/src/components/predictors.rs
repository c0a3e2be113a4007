//! 提交函数的调用接口
//!
//! 每个提交函数解析为一个 [`Predictor`]：要么是在提交目录中启动的外部进程，
//! 要么是静态链接并注册在 [`PredictorRegistry`] 中的实现。

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use evaluator_domain::TimeSeries;
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::dependency_installer::tail;

/// 单次调用：主序列按位置传入，其余为关键字参数
#[derive(Debug, Clone)]
pub struct PredictorInvocation {
    pub function: String,
    pub series: TimeSeries,
    pub kwargs: BTreeMap<String, Value>,
}

#[async_trait]
pub trait Predictor: Send + Sync {
    /// 按声明顺序的形参名，第一个接收主序列
    fn parameter_names(&self) -> Vec<String>;

    async fn invoke(&self, invocation: &PredictorInvocation) -> EvaluatorResult<Value>;
}

/// 通过子进程运行提交代码：stdin 写入调用 JSON，stdout 最后一个非空行为结果
pub struct ProcessPredictor {
    command: Vec<String>,
    parameters: Vec<String>,
    working_dir: PathBuf,
}

impl ProcessPredictor {
    pub fn new(
        command: Vec<String>,
        parameters: Vec<String>,
        working_dir: PathBuf,
    ) -> EvaluatorResult<Self> {
        if command.is_empty() {
            return Err(EvaluatorError::ParameterIntrospection(
                "command cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            command,
            parameters,
            working_dir,
        })
    }
}

#[async_trait]
impl Predictor for ProcessPredictor {
    fn parameter_names(&self) -> Vec<String> {
        self.parameters.clone()
    }

    async fn invoke(&self, invocation: &PredictorInvocation) -> EvaluatorResult<Value> {
        let payload = serde_json::json!({
            "function": invocation.function,
            "series": invocation.series.to_json(),
            "kwargs": invocation.kwargs,
        });
        let payload = serde_json::to_vec(&payload)?;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| EvaluatorError::invocation("empty command"))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EvaluatorError::invocation(format!("启动 {program} 失败: {e}")))?;

        // 写入与读取并发进行，避免管道缓冲区写满后互相等待
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                // 进程可能不读 stdin 就退出，写入失败以退出码为准
                if let Err(e) = stdin.write_all(&payload).await {
                    debug!("Writing invocation to stdin failed: {}", e);
                }
            })
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| EvaluatorError::invocation(format!("等待进程结束失败: {e}")))?;
        if let Some(writer) = writer {
            let _ = writer.await;
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EvaluatorError::invocation(format!(
                "退出码 {:?}: {}",
                output.status.code(),
                tail(&stderr, 10)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| EvaluatorError::invocation("进程没有输出结果"))?;
        serde_json::from_str(last_line.trim())
            .map_err(|e| EvaluatorError::invocation(format!("无法解析输出 {last_line:?}: {e}")))
    }
}

/// 静态链接的预测器，按符号名查找
#[derive(Default, Clone)]
pub struct PredictorRegistry {
    predictors: HashMap<String, Arc<dyn Predictor>>,
}

impl PredictorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, symbol: impl Into<String>, predictor: Arc<dyn Predictor>) {
        self.predictors.insert(symbol.into(), predictor);
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<dyn Predictor>> {
        self.predictors.get(symbol).cloned()
    }
}

impl std::fmt::Debug for PredictorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut symbols: Vec<_> = self.predictors.keys().collect();
        symbols.sort();
        f.debug_struct("PredictorRegistry")
            .field("symbols", &symbols)
            .finish()
    }
}
