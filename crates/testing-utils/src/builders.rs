//! 测试数据构造器
//!
//! harness（配置、文件关联表、数据文件）和提交压缩包都以构造器给出合理默认值，
//! 再通过 `stage` 写入任意 [`ObjectStager`]。

use std::io::{Cursor, Write};

use chrono::{Duration, NaiveDate};
use evaluator_config::StorageConfig;
use evaluator_domain::{FileMetadata, ObjectStager, SystemMetadata};
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use serde_json::{json, Value};

use crate::helpers::stage_bytes;

pub fn file_metadata(file_id: i64, file_name: &str, system_id: i64) -> FileMetadata {
    FileMetadata {
        file_id,
        file_name: file_name.to_string(),
        system_id,
        data_sampling_frequency: Some(15.0),
        issue: Some("clean".to_string()),
        subissue: None,
    }
}

pub fn system_metadata(system_id: i64, tilt: f64, azimuth: f64) -> SystemMetadata {
    SystemMetadata {
        system_id,
        name: Some(format!("system_{system_id}")),
        azimuth: Some(azimuth),
        tilt: Some(tilt),
        elevation: Some(1600.0),
        latitude: Some(39.7 + system_id as f64 / 100.0),
        longitude: Some(-105.2),
        tracking: Some(false),
        dc_capacity: Some(5.0),
    }
}

/// 从 2023-01-01 00:00 起每 15 分钟一个点的 CSV
pub fn series_csv(values: &[f64]) -> String {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    let mut csv = String::from("timestamp,value\n");
    for (i, value) in values.iter().enumerate() {
        let ts = start + Duration::minutes(15 * i as i64);
        let cell = if value.is_nan() {
            String::new()
        } else {
            value.to_string()
        };
        csv.push_str(&format!("{},{}\n", ts.format("%Y-%m-%d %H:%M:%S"), cell));
    }
    csv
}

/// harness 构造器
#[derive(Debug, Clone)]
pub struct HarnessBuilder {
    analysis_id: i64,
    config: Value,
    file_ids: Vec<i64>,
    analytical: Vec<(String, String)>,
    ground_truth: Vec<(String, String)>,
    extra: Vec<(String, Vec<u8>)>,
    include_config: bool,
    include_link_table: bool,
}

impl HarnessBuilder {
    /// 标量比较，默认计算 runtime 与 absolute_error
    pub fn scalar(analysis_id: i64, function_name: &str, ground_truth: &[&str]) -> Self {
        Self::with_config(
            analysis_id,
            json!({
                "function_name": function_name,
                "comparison_type": "scalar",
                "ground_truth_compare": ground_truth,
                "allowable_kwargs": ["latitude", "longitude", "tilt", "azimuth", "elevation"],
                "performance_metrics": ["runtime", "absolute_error"],
                "plots": [],
                "public_results_table": "public_results.json",
                "private_results_columns": ["file_name", "run_time", "data_requirements"]
            }),
        )
    }

    pub fn time_series(analysis_id: i64, function_name: &str, field: &str) -> Self {
        Self::with_config(
            analysis_id,
            json!({
                "function_name": function_name,
                "comparison_type": "time_series",
                "ground_truth_compare": [field],
                "allowable_kwargs": ["latitude", "longitude"],
                "performance_metrics": ["runtime", "mean_absolute_error"],
                "public_results_table": "public_results.json",
                "private_results_columns": ["file_name", "run_time"]
            }),
        )
    }

    pub fn with_config(analysis_id: i64, config: Value) -> Self {
        Self {
            analysis_id,
            config,
            file_ids: Vec::new(),
            analytical: Vec::new(),
            ground_truth: Vec::new(),
            extra: Vec::new(),
            include_config: true,
            include_link_table: true,
        }
    }

    /// 修改配置中的单个字段
    pub fn set(mut self, key: &str, value: Value) -> Self {
        if let Some(map) = self.config.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        self
    }

    pub fn with_file(mut self, file_id: i64, file_name: &str, analytical_csv: &str) -> Self {
        self.file_ids.push(file_id);
        self.analytical
            .push((file_name.to_string(), analytical_csv.to_string()));
        self
    }

    pub fn with_ground_truth(mut self, file_name: &str, csv: &str) -> Self {
        self.ground_truth
            .push((file_name.to_string(), csv.to_string()));
        self
    }

    pub fn with_harness_file(mut self, name: &str, content: &[u8]) -> Self {
        self.extra.push((name.to_string(), content.to_vec()));
        self
    }

    pub fn without_config(mut self) -> Self {
        self.include_config = false;
        self
    }

    pub fn without_link_table(mut self) -> Self {
        self.include_link_table = false;
        self
    }

    pub fn link_table(&self) -> String {
        let mut csv = String::from("test_id,file_id\n");
        for (i, id) in self.file_ids.iter().enumerate() {
            csv.push_str(&format!("{},{}\n", i + 1, id));
        }
        csv
    }

    pub async fn stage(
        &self,
        stager: &dyn ObjectStager,
        storage: &StorageConfig,
    ) -> EvaluatorResult<()> {
        let prefix = storage.harness_prefix(self.analysis_id);
        if self.include_config {
            let config = serde_json::to_vec_pretty(&self.config)?;
            stage_bytes(stager, &format!("{prefix}/config.json"), &config).await?;
        }
        if self.include_link_table {
            stage_bytes(
                stager,
                &format!("{prefix}/file_test_link.csv"),
                self.link_table().as_bytes(),
            )
            .await?;
        }
        for (name, content) in &self.extra {
            stage_bytes(stager, &format!("{prefix}/{name}"), content).await?;
        }
        for (name, csv) in &self.analytical {
            stage_bytes(stager, &storage.analytical_key(name), csv.as_bytes()).await?;
        }
        for (name, csv) in &self.ground_truth {
            stage_bytes(stager, &storage.ground_truth_key(name), csv.as_bytes()).await?;
        }
        Ok(())
    }
}

/// 提交压缩包构造器，写出 `manifest.json` 和任意附加文件
#[derive(Debug, Clone)]
pub struct SubmissionBuilder {
    module: String,
    functions: serde_json::Map<String, Value>,
    files: Vec<(String, Vec<u8>)>,
    raw_manifest: Option<Vec<u8>>,
    root: String,
}

impl SubmissionBuilder {
    pub fn new(module: &str) -> Self {
        Self {
            module: module.to_string(),
            functions: serde_json::Map::new(),
            files: Vec::new(),
            raw_manifest: None,
            root: String::new(),
        }
    }

    /// 由 `sh -c <script>` 实现的函数
    pub fn with_shell_function(
        self,
        name: &str,
        parameters: &[&str],
        outputs: Option<&[&str]>,
        script: &str,
    ) -> Self {
        self.with_function(
            name,
            json!({
                "parameters": parameters,
                "outputs": outputs,
                "command": ["sh", "-c", script],
            }),
        )
    }

    pub fn with_symbol_function(self, name: &str, symbol: &str, outputs: Option<&[&str]>) -> Self {
        self.with_function(name, json!({ "symbol": symbol, "outputs": outputs }))
    }

    pub fn with_function(mut self, name: &str, entry: Value) -> Self {
        self.functions.insert(name.to_string(), entry);
        self
    }

    pub fn with_file(mut self, path: &str, content: &[u8]) -> Self {
        self.files.push((path.to_string(), content.to_vec()));
        self
    }

    pub fn with_raw_manifest(mut self, content: &[u8]) -> Self {
        self.raw_manifest = Some(content.to_vec());
        self
    }

    /// 把所有文件放进压缩包内的子目录
    pub fn nested_in(mut self, dir: &str) -> Self {
        self.root = format!("{}/", dir.trim_end_matches('/'));
        self
    }

    fn entries(&self) -> EvaluatorResult<Vec<(String, Vec<u8>)>> {
        let manifest = match &self.raw_manifest {
            Some(raw) => raw.clone(),
            None => serde_json::to_vec_pretty(&json!({
                "module": self.module,
                "functions": self.functions,
            }))?,
        };
        let mut entries = vec![(format!("{}manifest.json", self.root), manifest)];
        for (path, content) in &self.files {
            entries.push((format!("{}{}", self.root, path), content.clone()));
        }
        Ok(entries)
    }

    pub fn build_tar_gz(&self) -> EvaluatorResult<Vec<u8>> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (path, content) in self.entries()? {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, &path, content.as_slice())?;
        }
        Ok(builder.into_inner()?.finish()?)
    }

    pub fn build_zip(&self) -> EvaluatorResult<Vec<u8>> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default().unix_permissions(0o755);
        for (path, content) in self.entries()? {
            writer
                .start_file(path, options)
                .map_err(|e| EvaluatorError::Internal(e.to_string()))?;
            writer.write_all(&content)?;
        }
        let cursor = writer
            .finish()
            .map_err(|e| EvaluatorError::Internal(e.to_string()))?;
        Ok(cursor.into_inner())
    }

    /// 按文件扩展名选择格式并上传到提交目录
    pub async fn stage(
        &self,
        stager: &dyn ObjectStager,
        storage: &StorageConfig,
        user_id: i64,
        submission_id: i64,
        artifact_name: &str,
    ) -> EvaluatorResult<()> {
        let bytes = if artifact_name.ends_with(".zip") {
            self.build_zip()?
        } else {
            self.build_tar_gz()?
        };
        let key = format!(
            "{}/{}",
            storage.submission_prefix(user_id, submission_id),
            artifact_name
        );
        stage_bytes(stager, &key, &bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_csv() {
        let csv = series_csv(&[1.0, f64::NAN]);
        assert_eq!(
            csv,
            "timestamp,value\n2023-01-01 00:00:00,1\n2023-01-01 00:15:00,\n"
        );
    }

    #[test]
    fn test_link_table() {
        let harness = HarnessBuilder::scalar(1, "f", &["tilt"])
            .with_file(10, "10.csv", "")
            .with_file(11, "11.csv", "");
        assert_eq!(harness.link_table(), "test_id,file_id\n1,10\n2,11\n");
    }

    #[test]
    fn test_archives_are_readable() {
        let builder = SubmissionBuilder::new("m")
            .with_shell_function("f", &["series"], None, "echo 1")
            .with_file("requirements.txt", b"numpy\n");

        let zip_bytes = builder.build_zip().unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(zip_bytes)).unwrap();
        assert_eq!(archive.len(), 2);

        let tar_bytes = builder.build_tar_gz().unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(tar_bytes.as_slice()));
        assert_eq!(archive.entries().unwrap().count(), 2);
    }
}
