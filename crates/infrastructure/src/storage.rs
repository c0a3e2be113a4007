//! 基于 `object_store` 的对象暂存实现
//!
//! 支持 `memory://`、`file:///path` 和 `s3://bucket/prefix`。

use async_trait::async_trait;
use evaluator_domain::ports::ObjectStager;
use evaluator_errors::{EvaluatorError, EvaluatorResult};
use futures::TryStreamExt;
use object_store::{path::Path as ObjectPath, ObjectStore, PutPayload};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

pub struct ObjectStoreStager {
    inner: Arc<dyn ObjectStore>,
    root: String,
}

impl ObjectStoreStager {
    pub fn from_url(url: &str) -> EvaluatorResult<Self> {
        let parsed = url::Url::parse(url)
            .map_err(|e| EvaluatorError::config_error(format!("无效的存储URL {url}: {e}")))?;
        let prefix = parsed.path().trim_matches('/').to_string();

        let (inner, root): (Arc<dyn ObjectStore>, String) = match parsed.scheme() {
            "memory" => (Arc::new(object_store::memory::InMemory::new()), String::new()),
            "file" => {
                let path = format!("/{prefix}");
                std::fs::create_dir_all(&path).map_err(|e| {
                    EvaluatorError::storage(format!("无法创建存储目录 {path}: {e}"))
                })?;
                let store = object_store::local::LocalFileSystem::new_with_prefix(&path)
                    .map_err(|e| EvaluatorError::storage(format!("无法打开本地存储 {path}: {e}")))?;
                (Arc::new(store), String::new())
            }
            "s3" => {
                let bucket = parsed.host_str().ok_or_else(|| {
                    EvaluatorError::config_error(format!("S3 URL 缺少 bucket: {url}"))
                })?;
                let mut builder =
                    object_store::aws::AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some((_, region)) = parsed.query_pairs().find(|(k, _)| k == "region") {
                    builder = builder.with_region(region.to_string());
                }
                let store = builder
                    .build()
                    .map_err(|e| EvaluatorError::storage(format!("无法创建 S3 客户端: {e}")))?;
                (Arc::new(store), prefix)
            }
            scheme => {
                return Err(EvaluatorError::config_error(format!(
                    "不支持的存储协议: {scheme}"
                )))
            }
        };

        info!("Object stager initialized for {}", url);
        Ok(Self { inner, root })
    }

    pub fn memory() -> Self {
        Self::from_store(Arc::new(object_store::memory::InMemory::new()))
    }

    pub fn from_store(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            root: String::new(),
        }
    }

    fn location(&self, key: &str) -> ObjectPath {
        let key = key.trim_matches('/');
        if self.root.is_empty() {
            ObjectPath::from(key)
        } else {
            ObjectPath::from(format!("{}/{}", self.root, key))
        }
    }

    fn relative_key(&self, location: &ObjectPath) -> String {
        let full = location.as_ref();
        if self.root.is_empty() {
            full.to_string()
        } else {
            full.strip_prefix(&format!("{}/", self.root))
                .unwrap_or(full)
                .to_string()
        }
    }

    fn map_get_error(key: &str, err: object_store::Error) -> EvaluatorError {
        match err {
            object_store::Error::NotFound { .. } => EvaluatorError::object_not_found(key),
            e => EvaluatorError::storage(format!("读取对象 {key} 失败: {e}")),
        }
    }
}

#[async_trait]
impl ObjectStager for ObjectStoreStager {
    async fn fetch(&self, key: &str, local_path: &Path) -> EvaluatorResult<PathBuf> {
        let result = self
            .inner
            .get(&self.location(key))
            .await
            .map_err(|e| Self::map_get_error(key, e))?;

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(local_path).await?;
        let mut stream = result.into_stream();
        while let Some(chunk) = stream
            .try_next()
            .await
            .map_err(|e| Self::map_get_error(key, e))?
        {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!("Fetched {} -> {}", key, local_path.display());
        Ok(local_path.to_path_buf())
    }

    async fn fetch_bytes(&self, key: &str) -> EvaluatorResult<Vec<u8>> {
        let result = self
            .inner
            .get(&self.location(key))
            .await
            .map_err(|e| Self::map_get_error(key, e))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| Self::map_get_error(key, e))?;
        Ok(bytes.to_vec())
    }

    async fn push(&self, local_path: &Path, key: &str) -> EvaluatorResult<()> {
        let content = tokio::fs::read(local_path).await?;
        self.inner
            .put(&self.location(key), PutPayload::from(content))
            .await
            .map_err(|e| EvaluatorError::storage(format!("写入对象 {key} 失败: {e}")))?;
        debug!("Pushed {} -> {}", local_path.display(), key);
        Ok(())
    }

    async fn push_dir(&self, local_dir: &Path, prefix: &str) -> EvaluatorResult<Vec<String>> {
        let prefix = prefix.trim_matches('/');
        let mut pending = vec![local_dir.to_path_buf()];
        let mut pushed = Vec::new();

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    let relative = path
                        .strip_prefix(local_dir)
                        .map_err(|e| EvaluatorError::Internal(e.to_string()))?;
                    let relative = relative
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    let key = format!("{prefix}/{relative}");
                    self.push(&path, &key).await?;
                    pushed.push(key);
                }
            }
        }

        pushed.sort();
        Ok(pushed)
    }

    async fn list(&self, prefix: &str) -> EvaluatorResult<Vec<String>> {
        let location = self.location(prefix);
        let entries: Vec<_> = match self.inner.list(Some(&location)).try_collect().await {
            Ok(entries) => entries,
            Err(object_store::Error::NotFound { .. }) => Vec::new(),
            Err(e) => {
                return Err(EvaluatorError::storage(format!(
                    "列出前缀 {prefix} 失败: {e}"
                )))
            }
        };

        // 部分后端会把前缀本身当作一个对象返回
        let prefix_key = prefix.trim_matches('/');
        let mut keys: Vec<String> = entries
            .iter()
            .map(|meta| self.relative_key(&meta.location))
            .filter(|key| key.trim_end_matches('/') != prefix_key)
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_push_then_fetch_round_trip() {
        let stager = ObjectStoreStager::memory();
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.bin");
        let payload: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        tokio::fs::write(&source, &payload).await.unwrap();

        stager.push(&source, "a/b/source.bin").await.unwrap();
        let target = dir.path().join("nested/out.bin");
        let fetched = stager.fetch("a/b/source.bin", &target).await.unwrap();

        assert_eq!(fetched, target);
        assert_eq!(tokio::fs::read(&target).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_fetch_missing_object_is_not_found() {
        let stager = ObjectStoreStager::memory();
        let dir = TempDir::new().unwrap();
        let err = stager
            .fetch("missing/key.csv", &dir.path().join("key.csv"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, EvaluatorError::ObjectNotFound { key } if key == "missing/key.csv"));

        let err = stager.fetch_bytes("missing/key.csv").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_under_prefix() {
        let stager = ObjectStoreStager::memory();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        tokio::fs::write(&file, b"x").await.unwrap();

        stager.push(&file, "evaluation_scripts/1/config.json").await.unwrap();
        stager.push(&file, "evaluation_scripts/1/file_test_link.csv").await.unwrap();
        stager.push(&file, "evaluation_scripts/12/config.json").await.unwrap();

        let keys = stager.list("evaluation_scripts/1").await.unwrap();
        assert_eq!(
            keys,
            vec![
                "evaluation_scripts/1/config.json".to_string(),
                "evaluation_scripts/1/file_test_link.csv".to_string(),
            ]
        );
        assert!(stager.list("nothing/here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_skips_object_at_prefix_itself() {
        let stager = ObjectStoreStager::memory();
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        tokio::fs::write(&file, b"x").await.unwrap();

        stager.push(&file, "evaluation_scripts/1").await.unwrap();
        stager.push(&file, "evaluation_scripts/1/config.json").await.unwrap();

        assert_eq!(
            stager.list("evaluation_scripts/1").await.unwrap(),
            vec!["evaluation_scripts/1/config.json".to_string()]
        );
        assert_eq!(
            stager.list("evaluation_scripts/1/").await.unwrap(),
            vec!["evaluation_scripts/1/config.json".to_string()]
        );
    }

    #[tokio::test]
    async fn test_push_dir() {
        let stager = ObjectStoreStager::memory();
        let dir = TempDir::new().unwrap();
        tokio::fs::create_dir_all(dir.path().join("plots")).await.unwrap();
        tokio::fs::write(dir.path().join("public.json"), b"{}").await.unwrap();
        tokio::fs::write(dir.path().join("plots/hist.svg"), b"<svg/>").await.unwrap();

        let keys = stager.push_dir(dir.path(), "results/").await.unwrap();
        assert_eq!(keys, vec!["results/plots/hist.svg", "results/public.json"]);
        assert_eq!(stager.fetch_bytes("results/plots/hist.svg").await.unwrap(), b"<svg/>");
    }

    #[tokio::test]
    async fn test_local_file_backend() {
        let root = TempDir::new().unwrap();
        let url = format!("file://{}", root.path().display());
        let stager = ObjectStoreStager::from_url(&url).unwrap();

        let work = TempDir::new().unwrap();
        let file = work.path().join("data.csv");
        tokio::fs::write(&file, b"t,v\n").await.unwrap();
        stager.push(&file, "data_files/analytical/data.csv").await.unwrap();

        assert!(root.path().join("data_files/analytical/data.csv").exists());
        assert_eq!(
            stager.list("data_files/analytical").await.unwrap(),
            vec!["data_files/analytical/data.csv"]
        );
    }

    #[test]
    fn test_unsupported_scheme() {
        assert!(ObjectStoreStager::from_url("ftp://host/x").is_err());
    }
}
