use evaluator_errors::{EvaluatorError, EvaluatorResult};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// 队列中的评估请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    #[serde(alias = "analysisId", deserialize_with = "deserialize_id")]
    pub analysis_id: i64,
    #[serde(alias = "submissionId", deserialize_with = "deserialize_id")]
    pub submission_id: i64,
    #[serde(alias = "userId", deserialize_with = "deserialize_id")]
    pub user_id: i64,
    #[serde(
        rename = "submission_filename",
        alias = "submissionFilename",
        alias = "submissionArtifactName"
    )]
    pub submission_artifact_name: String,
}

impl JobMessage {
    pub fn parse(body: &str) -> EvaluatorResult<Self> {
        let message: JobMessage = serde_json::from_str(body)
            .map_err(|e| EvaluatorError::malformed_message(e.to_string()))?;

        if message.analysis_id <= 0 || message.submission_id <= 0 || message.user_id <= 0 {
            return Err(EvaluatorError::malformed_message(
                "analysis_id, submission_id and user_id must be positive",
            ));
        }
        let artifact = message.submission_artifact_name.trim();
        if artifact.is_empty() || artifact.contains('/') || artifact.contains("..") {
            return Err(EvaluatorError::malformed_message(format!(
                "invalid submission_filename: {:?}",
                message.submission_artifact_name
            )));
        }
        Ok(message)
    }

    /// 从格式错误的消息中尽量取出 (analysis_id, submission_id)，用于上报失败状态
    pub fn salvage_ids(body: &str) -> Option<(i64, i64)> {
        let value: serde_json::Value = serde_json::from_str(body).ok()?;
        let lookup = |snake: &str, camel: &str| -> Option<i64> {
            let field = value.get(snake).or_else(|| value.get(camel))?;
            match field {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
        };
        Some((
            lookup("analysis_id", "analysisId")?,
            lookup("submission_id", "submissionId")?,
        ))
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(n) => Ok(n),
        RawId::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid id: {s:?}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Submitted,
    Running,
    Finished,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Finished => "finished",
            SubmissionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    #[serde(alias = "fileId")]
    pub file_id: i64,
    #[serde(alias = "fileName")]
    pub file_name: String,
    #[serde(alias = "systemId")]
    pub system_id: i64,
    /// 采样间隔（分钟）
    #[serde(default, alias = "dataSamplingFrequency")]
    pub data_sampling_frequency: Option<f64>,
    #[serde(default)]
    pub issue: Option<String>,
    #[serde(default, alias = "subIssue")]
    pub subissue: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    #[serde(alias = "systemId")]
    pub system_id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub azimuth: Option<f64>,
    #[serde(default)]
    pub tilt: Option<f64>,
    #[serde(default)]
    pub elevation: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub tracking: Option<bool>,
    #[serde(default, alias = "dcCapacity")]
    pub dc_capacity: Option<f64>,
}

/// 候选关键字参数：文件元数据与系统元数据合并后的字段
pub type CandidateArguments = BTreeMap<String, serde_json::Value>;

/// 元数据表中的一行：一个测试文件及其所属系统
#[derive(Debug, Clone, PartialEq)]
pub struct FileTestCase {
    pub file: FileMetadata,
    pub system: SystemMetadata,
}

impl FileTestCase {
    pub fn new(file: FileMetadata, system: SystemMetadata) -> Self {
        Self { file, system }
    }

    pub fn file_name(&self) -> &str {
        &self.file.file_name
    }

    /// 合并后的字段，空值被省略
    pub fn candidate_arguments(&self) -> CandidateArguments {
        let mut args = CandidateArguments::new();
        for source in [
            serde_json::to_value(&self.system),
            serde_json::to_value(&self.file),
        ] {
            if let Ok(serde_json::Value::Object(map)) = source {
                for (key, value) in map {
                    if !value.is_null() {
                        args.insert(key, value);
                    }
                }
            }
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerFileResult {
    pub file_name: String,
    pub run_time_seconds: f64,
    pub data_requirements: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerFileFailure {
    pub file_name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Success(PerFileResult),
    Failure(PerFileFailure),
}

/// 评估循环的输出，交给报告生成
#[derive(Debug, Clone, Default)]
pub struct EvaluationOutcome {
    pub results: Vec<PerFileResult>,
    pub failures: Vec<PerFileFailure>,
    pub total_files: usize,
    pub data_requirements: Vec<String>,
}

impl EvaluationOutcome {
    pub fn success_rate(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            (self.total_files - self.failures.len()) as f64 / self.total_files as f64
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultsTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportArtifact {
    pub name: String,
    pub path: std::path::PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub public_metrics: serde_json::Map<String, serde_json::Value>,
    pub private_table: ResultsTable,
    pub artifacts: Vec<ReportArtifact>,
    pub warnings: Vec<String>,
    pub total_files: usize,
    pub failed_files: usize,
    pub success_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_message() {
        let body = r#"{"analysis_id": 1, "submission_id": 42, "user_id": 7, "submission_filename": "submission.zip"}"#;
        let message = JobMessage::parse(body).unwrap();
        assert_eq!(message.analysis_id, 1);
        assert_eq!(message.submission_id, 42);
        assert_eq!(message.user_id, 7);
        assert_eq!(message.submission_artifact_name, "submission.zip");
    }

    #[test]
    fn test_parse_job_message_accepts_aliases_and_string_ids() {
        let body = r#"{"analysisId": "3", "submissionId": 9, "userId": "11", "submissionArtifactName": "code.tar.gz"}"#;
        let message = JobMessage::parse(body).unwrap();
        assert_eq!(message.analysis_id, 3);
        assert_eq!(message.user_id, 11);
        assert_eq!(message.submission_artifact_name, "code.tar.gz");
    }

    #[test]
    fn test_parse_malformed_messages() {
        let cases = [
            "not json",
            r#"{"analysis_id": 1}"#,
            r#"{"analysis_id": "x", "submission_id": 1, "user_id": 1, "submission_filename": "a.zip"}"#,
            r#"{"analysis_id": 1, "submission_id": 1, "user_id": 1, "submission_filename": ""}"#,
            r#"{"analysis_id": 1, "submission_id": 1, "user_id": 1, "submission_filename": "../a.zip"}"#,
            r#"{"analysis_id": 0, "submission_id": 1, "user_id": 1, "submission_filename": "a.zip"}"#,
        ];
        for body in cases {
            let err = JobMessage::parse(body).unwrap_err();
            assert_eq!(err.kind(), evaluator_errors::ErrorKind::Message, "{body}");
        }
    }

    #[test]
    fn test_salvage_ids() {
        assert_eq!(
            JobMessage::salvage_ids(r#"{"analysis_id": 2, "submission_id": "5"}"#),
            Some((2, 5))
        );
        assert_eq!(JobMessage::salvage_ids(r#"{"analysis_id": 2}"#), None);
        assert_eq!(JobMessage::salvage_ids("garbage"), None);
    }

    #[test]
    fn test_submission_status_serialization() {
        let json = serde_json::to_string(&SubmissionStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        assert_eq!(SubmissionStatus::Failed.to_string(), "failed");

        let parsed: Vec<SubmissionStatus> =
            serde_json::from_str(r#"["submitted", "running", "finished", "failed"]"#).unwrap();
        assert_eq!(parsed[0], SubmissionStatus::Submitted);
        assert_eq!(parsed[3], SubmissionStatus::Failed);
    }

    #[test]
    fn test_candidate_arguments_join() {
        let case = FileTestCase::new(
            FileMetadata {
                file_id: 10,
                file_name: "10.csv".to_string(),
                system_id: 1,
                data_sampling_frequency: Some(15.0),
                issue: Some("clipping".to_string()),
                subissue: None,
            },
            SystemMetadata {
                system_id: 1,
                name: Some("Site A".to_string()),
                azimuth: Some(180.0),
                tilt: Some(25.0),
                elevation: None,
                latitude: Some(39.7),
                longitude: Some(-105.2),
                tracking: Some(false),
                dc_capacity: Some(5.5),
            },
        );

        let args = case.candidate_arguments();
        assert_eq!(args["file_name"], "10.csv");
        assert_eq!(args["latitude"], 39.7);
        assert_eq!(args["data_sampling_frequency"], 15.0);
        assert_eq!(args["tracking"], false);
        assert!(!args.contains_key("elevation"));
        assert!(!args.contains_key("subissue"));
    }

    #[test]
    fn test_success_rate() {
        let outcome = EvaluationOutcome {
            total_files: 4,
            failures: vec![PerFileFailure {
                file_name: "a.csv".to_string(),
                reason: "boom".to_string(),
            }],
            ..Default::default()
        };
        assert_eq!(outcome.success_rate(), 0.75);
        assert_eq!(EvaluationOutcome::default().success_rate(), 0.0);
    }
}
