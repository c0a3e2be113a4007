use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use evaluator_config::StorageConfig;
use evaluator_domain::{JobMessage, ObjectStager};
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use serde::Deserialize;
use tracing::{debug, info};

use super::dependency_installer::DependencyInstaller;
use super::predictors::{Predictor, PredictorRegistry, ProcessPredictor};

pub const MANIFEST_FILE: &str = "manifest.json";
const REQUIREMENTS_FILE: &str = "requirements.txt";

#[derive(Debug, Deserialize)]
struct SubmissionManifest {
    module: String,
    functions: HashMap<String, FunctionEntry>,
}

#[derive(Debug, Deserialize)]
struct FunctionEntry {
    #[serde(default)]
    parameters: Option<Vec<String>>,
    #[serde(default)]
    outputs: Option<Vec<String>>,
    #[serde(default)]
    command: Option<Vec<String>>,
    #[serde(default)]
    symbol: Option<String>,
}

/// 已解析的提交入口
#[derive(Clone)]
pub struct LoadedSubmission {
    pub module: String,
    pub function_name: String,
    pub parameter_names: Vec<String>,
    pub outputs: Option<Vec<String>>,
    pub predictor: Arc<dyn Predictor>,
    pub source_dir: PathBuf,
}

impl LoadedSubmission {
    /// 除第一个形参外的其余形参
    pub fn data_requirements(&self) -> Vec<String> {
        self.parameter_names.iter().skip(1).cloned().collect()
    }
}

impl std::fmt::Debug for LoadedSubmission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedSubmission")
            .field("module", &self.module)
            .field("function_name", &self.function_name)
            .field("parameter_names", &self.parameter_names)
            .field("outputs", &self.outputs)
            .field("source_dir", &self.source_dir)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    fn detect(artifact: &str) -> Option<Self> {
        let lower = artifact.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(Self::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(Self::TarGz)
        } else {
            None
        }
    }
}

pub struct SubmissionLoader {
    stager: Arc<dyn ObjectStager>,
    storage: StorageConfig,
    registry: PredictorRegistry,
    installer: DependencyInstaller,
}

impl SubmissionLoader {
    pub fn new(
        stager: Arc<dyn ObjectStager>,
        storage: StorageConfig,
        registry: PredictorRegistry,
        installer: DependencyInstaller,
    ) -> Self {
        Self {
            stager,
            storage,
            registry,
            installer,
        }
    }

    pub async fn load(
        &self,
        message: &JobMessage,
        function_name: &str,
        work_dir: &Path,
    ) -> EvaluatorResult<LoadedSubmission> {
        let artifact = &message.submission_artifact_name;
        let key = format!(
            "{}/{}",
            self.storage
                .submission_prefix(message.user_id, message.submission_id),
            artifact
        );
        let archive_path = work_dir.join("artifact").join(artifact);
        match self.stager.fetch(&key, &archive_path).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {
                return Err(EvaluatorError::SubmissionArtifactMissing {
                    artifact: artifact.clone(),
                })
            }
            Err(e) => return Err(e),
        }

        let extract_dir = work_dir.join("submission");
        extract_archive(&archive_path, &extract_dir).await?;

        let manifest_path = locate_manifest(&extract_dir).await?;
        let source_dir = manifest_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| extract_dir.clone());

        let requirements = source_dir.join(REQUIREMENTS_FILE);
        if tokio::fs::try_exists(&requirements).await? {
            self.installer.install(&requirements, &source_dir).await?;
        }

        let bytes = tokio::fs::read(&manifest_path).await?;
        let manifest: SubmissionManifest = serde_json::from_slice(&bytes).map_err(|e| {
            EvaluatorError::SubmissionSourceMissing(format!("{MANIFEST_FILE} is not valid: {e}"))
        })?;

        let submission = self.resolve_entry_point(manifest, function_name, source_dir)?;
        info!(
            "Loaded submission module {} with entry point {}({})",
            submission.module,
            submission.function_name,
            submission.parameter_names.join(", ")
        );
        Ok(submission)
    }

    fn resolve_entry_point(
        &self,
        mut manifest: SubmissionManifest,
        function_name: &str,
        source_dir: PathBuf,
    ) -> EvaluatorResult<LoadedSubmission> {
        let entry = manifest.functions.remove(function_name).ok_or_else(|| {
            EvaluatorError::EntryPointNotFound {
                function: function_name.to_string(),
            }
        })?;

        let predictor: Arc<dyn Predictor> = match (entry.command, entry.symbol) {
            (Some(command), None) => {
                let parameters = entry.parameters.ok_or_else(|| {
                    EvaluatorError::ParameterIntrospection(format!(
                        "{function_name} declares a command but no parameters"
                    ))
                })?;
                Arc::new(ProcessPredictor::new(
                    command,
                    parameters,
                    source_dir.clone(),
                )?)
            }
            (None, Some(symbol)) => {
                self.registry
                    .get(&symbol)
                    .ok_or(EvaluatorError::EntryPointNotFound { function: symbol })?
            }
            _ => {
                return Err(EvaluatorError::ParameterIntrospection(format!(
                    "{function_name} must declare exactly one of command or symbol"
                )))
            }
        };

        let parameter_names = predictor.parameter_names();
        validate_parameters(function_name, &parameter_names)?;

        Ok(LoadedSubmission {
            module: manifest.module,
            function_name: function_name.to_string(),
            parameter_names,
            outputs: entry.outputs,
            predictor,
            source_dir,
        })
    }
}

fn validate_parameters(function_name: &str, parameters: &[String]) -> EvaluatorResult<()> {
    if parameters.is_empty() {
        return Err(EvaluatorError::ParameterIntrospection(format!(
            "{function_name} must accept the time series as its first parameter"
        )));
    }
    let mut seen = HashSet::new();
    for name in parameters {
        if name.trim().is_empty() || !seen.insert(name.as_str()) {
            return Err(EvaluatorError::ParameterIntrospection(format!(
                "{function_name} has an empty or duplicate parameter name: {name:?}"
            )));
        }
    }
    Ok(())
}

async fn extract_archive(archive: &Path, dest: &Path) -> EvaluatorResult<()> {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = ArchiveFormat::detect(&file_name).ok_or_else(|| {
        EvaluatorError::ArchiveMalformed(format!("unsupported archive format: {file_name}"))
    })?;

    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || extract_archive_blocking(format, &archive, &dest))
        .await
        .map_err(|e| EvaluatorError::Internal(format!("extraction task failed: {e}")))?
}

fn extract_archive_blocking(
    format: ArchiveFormat,
    archive: &Path,
    dest: &Path,
) -> EvaluatorResult<()> {
    std::fs::create_dir_all(dest)?;
    let file = File::open(archive)?;
    match format {
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| EvaluatorError::ArchiveMalformed(e.to_string()))?;
            zip.extract(dest)
                .map_err(|e| EvaluatorError::ArchiveMalformed(e.to_string()))?;
        }
        ArchiveFormat::TarGz => {
            let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(file));
            tar.unpack(dest)
                .map_err(|e| EvaluatorError::ArchiveMalformed(e.to_string()))?;
        }
    }
    debug!("Extracted {} into {}", archive.display(), dest.display());
    Ok(())
}

/// 压缩包中必须恰好有一个 manifest
async fn locate_manifest(root: &Path) -> EvaluatorResult<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                // macOS 压缩时附带的元数据目录
                if entry.file_name() != "__MACOSX" {
                    pending.push(path);
                }
            } else if entry.file_name() == MANIFEST_FILE {
                found.push(path);
            }
        }
    }

    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(EvaluatorError::SubmissionSourceMissing(format!(
            "no {MANIFEST_FILE} in submission"
        ))),
        n => Err(EvaluatorError::SubmissionSourceMissing(format!(
            "found {n} {MANIFEST_FILE} files, expected exactly one"
        ))),
    }
}
