use async_trait::async_trait;
use evaluator_config::MetadataApiConfig;
use evaluator_domain::entities::{FileMetadata, SubmissionStatus, SystemMetadata};
use evaluator_domain::ports::MetadataApi;
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// 元数据服务的 HTTP 客户端
pub struct HttpMetadataClient {
    client: Client,
    base_url: String,
}

impl HttpMetadataClient {
    pub fn new(config: &MetadataApiConfig) -> EvaluatorResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| EvaluatorError::MetadataApi(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> EvaluatorResult<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("GET {}", url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EvaluatorError::MetadataApi(format!("请求 {url} 失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EvaluatorError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| EvaluatorError::Serialization(format!("解析 {url} 响应失败: {e}")))
    }

    async fn put_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> EvaluatorResult<()> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("PUT {}", url);
        let response = self
            .client
            .put(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| EvaluatorError::MetadataApi(format!("请求 {url} 失败: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EvaluatorError::HttpStatus {
                status: status.as_u16(),
                url,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MetadataApi for HttpMetadataClient {
    async fn system_metadata(&self, system_id: i64) -> EvaluatorResult<SystemMetadata> {
        self.get_json(&format!("system_metadata/{system_id}")).await
    }

    async fn file_metadata(&self, file_id: i64) -> EvaluatorResult<FileMetadata> {
        self.get_json(&format!("file_metadata/{file_id}")).await
    }

    async fn update_submission_status(
        &self,
        analysis_id: i64,
        submission_id: i64,
        status: SubmissionStatus,
    ) -> EvaluatorResult<()> {
        self.put_json(
            &format!(
                "submissions/analysis/{analysis_id}/change_submission_status/{submission_id}"
            ),
            &serde_json::json!({ "status": status }),
        )
        .await
    }

    async fn update_submission_result(
        &self,
        analysis_id: i64,
        submission_id: i64,
        public_metrics: &serde_json::Map<String, serde_json::Value>,
    ) -> EvaluatorResult<()> {
        self.put_json(
            &format!(
                "submissions/analysis/{analysis_id}/update_submission_result/{submission_id}"
            ),
            public_metrics,
        )
        .await
    }
}
