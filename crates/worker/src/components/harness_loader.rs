use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use evaluator_config::StorageConfig;
use evaluator_domain::{
    AnalysisDefinition, ComparisonType, FileTestCase, MetadataApi, ObjectStager, SystemMetadata,
};
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use tracing::{debug, info};

use super::dependency_installer::DependencyInstaller;

pub const CONFIG_FILE: &str = "config.json";
pub const FILE_LINK_TABLE: &str = "file_test_link.csv";
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// 暂存完成的 harness
#[derive(Debug, Clone)]
pub struct LoadedHarness {
    pub definition: AnalysisDefinition,
    pub table: Vec<FileTestCase>,
    pub harness_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl LoadedHarness {
    pub fn analytical_path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join("analytical").join(file_name)
    }

    pub fn ground_truth_path(&self, file_name: &str) -> PathBuf {
        self.data_dir.join("ground_truth").join(file_name)
    }
}

pub struct HarnessLoader {
    stager: Arc<dyn ObjectStager>,
    metadata: Arc<dyn MetadataApi>,
    storage: StorageConfig,
    installer: DependencyInstaller,
}

impl HarnessLoader {
    pub fn new(
        stager: Arc<dyn ObjectStager>,
        metadata: Arc<dyn MetadataApi>,
        storage: StorageConfig,
        installer: DependencyInstaller,
    ) -> Self {
        Self {
            stager,
            metadata,
            storage,
            installer,
        }
    }

    /// 暂存 harness、解析元数据表并下载所有数据文件。
    /// 任何缺失都在提交代码运行之前报错。
    pub async fn load(&self, analysis_id: i64, work_dir: &Path) -> EvaluatorResult<LoadedHarness> {
        let harness_dir = work_dir.join("harness");
        let data_dir = work_dir.join("data");
        tokio::fs::create_dir_all(&harness_dir).await?;

        let staged = self.stage_harness_files(analysis_id, &harness_dir).await?;
        for required in [CONFIG_FILE, FILE_LINK_TABLE] {
            if !staged.iter().any(|name| name == required) {
                return Err(EvaluatorError::MissingHarnessFile {
                    analysis_id,
                    file: required.to_string(),
                });
            }
        }

        let config = tokio::fs::read(harness_dir.join(CONFIG_FILE)).await?;
        let definition = AnalysisDefinition::from_json(analysis_id, &config)?;
        info!(
            "Loaded analysis {} ({:?} comparison of {})",
            analysis_id, definition.comparison_type, definition.function_name
        );

        if staged.iter().any(|name| name == REQUIREMENTS_FILE) {
            self.installer
                .install(&harness_dir.join(REQUIREMENTS_FILE), work_dir)
                .await?;
        }

        let link_table = tokio::fs::read_to_string(harness_dir.join(FILE_LINK_TABLE)).await?;
        let file_ids = parse_file_ids(&link_table)?;
        let table = self.resolve_metadata_table(&file_ids).await?;

        let harness = LoadedHarness {
            definition,
            table,
            harness_dir,
            data_dir,
        };
        self.stage_data_files(&harness).await?;
        Ok(harness)
    }

    async fn stage_harness_files(
        &self,
        analysis_id: i64,
        harness_dir: &Path,
    ) -> EvaluatorResult<Vec<String>> {
        let prefix = self.storage.harness_prefix(analysis_id);
        let keys = self.stager.list(&prefix).await?;

        let mut staged = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(relative) = key.strip_prefix(&format!("{prefix}/")) else {
                continue;
            };
            if relative.split('/').any(|part| part == ".." || part.is_empty()) {
                debug!("Skipping suspicious harness key {}", key);
                continue;
            }
            self.stager.fetch(&key, &harness_dir.join(relative)).await?;
            staged.push(relative.to_string());
        }
        debug!("Staged {} harness files for analysis {}", staged.len(), analysis_id);
        Ok(staged)
    }

    async fn resolve_metadata_table(&self, file_ids: &[i64]) -> EvaluatorResult<Vec<FileTestCase>> {
        let mut systems: HashMap<i64, SystemMetadata> = HashMap::new();
        let mut table = Vec::with_capacity(file_ids.len());

        for &file_id in file_ids {
            let file = self.metadata.file_metadata(file_id).await?;
            ensure_plain_file_name(&file.file_name)?;

            let system = match systems.get(&file.system_id) {
                Some(system) => system.clone(),
                None => {
                    let system = self.metadata.system_metadata(file.system_id).await?;
                    systems.insert(file.system_id, system.clone());
                    system
                }
            };
            table.push(FileTestCase::new(file, system));
        }

        info!(
            "Resolved metadata for {} files across {} systems",
            table.len(),
            systems.len()
        );
        Ok(table)
    }

    async fn stage_data_files(&self, harness: &LoadedHarness) -> EvaluatorResult<()> {
        let needs_ground_truth =
            harness.definition.comparison_type == ComparisonType::TimeSeries;

        for case in &harness.table {
            let file_name = case.file_name();
            self.fetch_data_file(
                &self.storage.analytical_key(file_name),
                &harness.analytical_path(file_name),
                "analytical",
                file_name,
            )
            .await?;

            if needs_ground_truth {
                self.fetch_data_file(
                    &self.storage.ground_truth_key(file_name),
                    &harness.ground_truth_path(file_name),
                    "ground truth",
                    file_name,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn fetch_data_file(
        &self,
        key: &str,
        local_path: &Path,
        kind: &str,
        file_name: &str,
    ) -> EvaluatorResult<()> {
        match self.stager.fetch(key, local_path).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => Err(EvaluatorError::MissingDataFile {
                kind: kind.to_string(),
                file_name: file_name.to_string(),
            }),
            Err(e) => Err(e),
        }
    }
}

/// `file_id` 列中的去重 ID，保持首次出现的顺序
pub fn parse_file_ids(content: &str) -> EvaluatorResult<Vec<i64>> {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| {
            EvaluatorError::InvalidAnalysisConfig(format!("{FILE_LINK_TABLE} is empty"))
        })?;
    let column = split_row(header)
        .iter()
        .position(|name| name == "file_id")
        .ok_or_else(|| {
            EvaluatorError::InvalidAnalysisConfig(format!(
                "{FILE_LINK_TABLE} has no file_id column"
            ))
        })?;

    let mut ids = Vec::new();
    for line in lines {
        let cells = split_row(line);
        let raw = cells.get(column).map(String::as_str).unwrap_or_default();
        let id = parse_id(raw).ok_or_else(|| {
            EvaluatorError::InvalidAnalysisConfig(format!(
                "{FILE_LINK_TABLE} contains an invalid file_id: {raw:?}"
            ))
        })?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

fn split_row(line: &str) -> Vec<String> {
    line.split(',')
        .map(|cell| cell.trim().trim_matches('"').to_string())
        .collect()
}

fn parse_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        // 由 pandas 导出的表格可能写成 "12.0"
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

fn ensure_plain_file_name(file_name: &str) -> EvaluatorResult<()> {
    let is_plain = Path::new(file_name)
        .file_name()
        .is_some_and(|name| name == file_name);
    if is_plain {
        Ok(())
    } else {
        Err(EvaluatorError::InvalidAnalysisConfig(format!(
            "file_name must be a plain file name: {file_name:?}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_ids_distinct_in_order() {
        let table = "test_id,file_id\n1,12\n2,7\n3,12\n4,9.0\n";
        assert_eq!(parse_file_ids(table).unwrap(), vec![12, 7, 9]);
    }

    #[test]
    fn test_parse_file_ids_requires_column() {
        let err = parse_file_ids("id,name\n1,a\n").unwrap_err();
        assert_eq!(err.kind(), evaluator_errors::ErrorKind::Staging);
        assert!(parse_file_ids("").is_err());
        assert!(parse_file_ids("file_id\nabc\n").is_err());
    }

    #[test]
    fn test_plain_file_names() {
        assert!(ensure_plain_file_name("10.csv").is_ok());
        assert!(ensure_plain_file_name("../10.csv").is_err());
        assert!(ensure_plain_file_name("a/10.csv").is_err());
        assert!(ensure_plain_file_name("..").is_err());
    }
}
