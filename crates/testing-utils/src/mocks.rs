//! 内存中的元数据 API 替身
//!
//! 预置系统/文件记录，并记录 worker 发出的所有状态和结果更新。

use async_trait::async_trait;
use evaluator_domain::{FileMetadata, MetadataApi, SubmissionStatus, SystemMetadata};
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub analysis_id: i64,
    pub submission_id: i64,
    pub status: SubmissionStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultUpdate {
    pub analysis_id: i64,
    pub submission_id: i64,
    pub public_metrics: Map<String, Value>,
    /// 结果提交时该提交的最新状态
    pub status_when_posted: Option<SubmissionStatus>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryMetadataApi {
    systems: Arc<Mutex<HashMap<i64, SystemMetadata>>>,
    files: Arc<Mutex<HashMap<i64, FileMetadata>>>,
    statuses: Arc<Mutex<Vec<StatusUpdate>>>,
    results: Arc<Mutex<Vec<ResultUpdate>>>,
    file_lookups: Arc<AtomicUsize>,
    system_lookups: Arc<AtomicUsize>,
    fail_updates: Arc<AtomicBool>,
}

impl InMemoryMetadataApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_system(self, system: SystemMetadata) -> Self {
        self.systems.lock().unwrap().insert(system.system_id, system);
        self
    }

    pub fn with_file(self, file: FileMetadata) -> Self {
        self.files.lock().unwrap().insert(file.file_id, file);
        self
    }

    /// 让状态/结果更新返回 503
    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    pub fn status_updates(&self) -> Vec<StatusUpdate> {
        self.statuses.lock().unwrap().clone()
    }

    pub fn statuses_for(&self, submission_id: i64) -> Vec<SubmissionStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.submission_id == submission_id)
            .map(|u| u.status)
            .collect()
    }

    pub fn last_status(&self, submission_id: i64) -> Option<SubmissionStatus> {
        self.statuses_for(submission_id).last().copied()
    }

    pub fn result_updates(&self) -> Vec<ResultUpdate> {
        self.results.lock().unwrap().clone()
    }

    pub fn file_lookups(&self) -> usize {
        self.file_lookups.load(Ordering::SeqCst)
    }

    pub fn system_lookups(&self) -> usize {
        self.system_lookups.load(Ordering::SeqCst)
    }

    fn check_updates(&self, url: &str) -> EvaluatorResult<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            Err(EvaluatorError::HttpStatus {
                status: 503,
                url: url.to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MetadataApi for InMemoryMetadataApi {
    async fn system_metadata(&self, system_id: i64) -> EvaluatorResult<SystemMetadata> {
        self.system_lookups.fetch_add(1, Ordering::SeqCst);
        self.systems
            .lock()
            .unwrap()
            .get(&system_id)
            .cloned()
            .ok_or_else(|| EvaluatorError::HttpStatus {
                status: 404,
                url: format!("system_metadata/{system_id}"),
            })
    }

    async fn file_metadata(&self, file_id: i64) -> EvaluatorResult<FileMetadata> {
        self.file_lookups.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(&file_id)
            .cloned()
            .ok_or_else(|| EvaluatorError::HttpStatus {
                status: 404,
                url: format!("file_metadata/{file_id}"),
            })
    }

    async fn update_submission_status(
        &self,
        analysis_id: i64,
        submission_id: i64,
        status: SubmissionStatus,
    ) -> EvaluatorResult<()> {
        self.statuses.lock().unwrap().push(StatusUpdate {
            analysis_id,
            submission_id,
            status,
        });
        self.check_updates("change_submission_status")
    }

    async fn update_submission_result(
        &self,
        analysis_id: i64,
        submission_id: i64,
        public_metrics: &Map<String, Value>,
    ) -> EvaluatorResult<()> {
        let status_when_posted = self.last_status(submission_id);
        self.results.lock().unwrap().push(ResultUpdate {
            analysis_id,
            submission_id,
            public_metrics: public_metrics.clone(),
            status_when_posted,
        });
        self.check_updates("update_submission_result")
    }
}
