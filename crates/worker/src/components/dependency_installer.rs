use std::path::Path;
use std::process::Stdio;

use evaluator_errors::{EvaluatorError, EvaluatorResult};
use tokio::process::Command;
use tracing::{info, warn};

/// 安装 harness 或提交附带的 `requirements.txt`
#[derive(Debug, Clone, Default)]
pub struct DependencyInstaller {
    command: Option<Vec<String>>,
}

impl DependencyInstaller {
    pub fn new(command: Option<Vec<String>>) -> Self {
        Self { command }
    }

    pub async fn install(&self, requirements: &Path, working_dir: &Path) -> EvaluatorResult<()> {
        let Some((program, args)) = self.command.as_ref().and_then(|c| c.split_first()) else {
            warn!(
                "No dependency install command configured, skipping {}",
                requirements.display()
            );
            return Ok(());
        };

        info!("Installing dependencies from {}", requirements.display());
        let output = Command::new(program)
            .args(args)
            .arg(requirements)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EvaluatorError::DependencyInstall(format!("启动 {program} 失败: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EvaluatorError::DependencyInstall(format!(
                "{program} 退出码 {:?}: {}",
                output.status.code(),
                tail(&stderr, 20)
            )));
        }
        Ok(())
    }
}

/// 取最后 n 行，用于错误信息
pub(crate) fn tail(text: &str, lines: usize) -> String {
    let collected: Vec<&str> = text.lines().collect();
    let start = collected.len().saturating_sub(lines);
    collected[start..].join("\n")
}
