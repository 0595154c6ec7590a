//! Object-store adapter: retrying wrapper over an S3-compatible backend
//! (Aliyun OSS), filename generation, and public URL formatting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore as _, PutPayload};
use rand::Rng;

use crate::config::OssConfig;
use crate::error::{Result, ServiceError};

/// Linear backoff: `base * attempt` between retries, unlike the exponential
/// growth more commonly reached for elsewhere in this codebase's lineage —
/// the retry window here is deliberately bounded and short.
struct LinearBackoff {
    base: Duration,
    attempt: u32,
}

impl LinearBackoff {
    fn new(base: Duration) -> Self {
        Self { base, attempt: 0 }
    }

    async fn sleep_and_advance(&mut self) {
        self.attempt += 1;
        tokio::time::sleep(self.base * self.attempt).await;
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone)]
pub struct UploadedObject {
    pub url: String,
    pub stored_path: String,
}

/// External object-store contract: upload, delete, connectivity check.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(&self, buffer: Vec<u8>, path: &str, content_type: &str) -> Result<UploadedObject>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn test_connection(&self) -> Result<bool>;
}

/// Generates a stored filename guaranteed unique across calls by
/// construction: task id, millisecond timestamp, and a short random suffix.
pub fn generate_file_name(task_id: &str, extension: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("{task_id}_{millis}_{suffix}.{extension}")
}

/// Aliyun OSS-backed adapter, built on the `object_store` crate's
/// S3-compatible client pointed at a custom endpoint.
pub struct AliyunOssAdapter {
    store: Arc<dyn object_store::ObjectStore>,
    config: OssConfig,
    max_retries: u32,
    retry_delay: Duration,
}

impl AliyunOssAdapter {
    pub fn new(config: OssConfig) -> Result<Self> {
        let endpoint = format!("https://{}.aliyuncs.com", config.region);
        let store = AmazonS3Builder::new()
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.access_key_secret)
            .with_bucket_name(&config.bucket)
            .with_region(&config.region)
            .with_endpoint(endpoint)
            .with_virtual_hosted_style_request(false)
            .build()
            .map_err(ServiceError::ObjectStore)?;

        Ok(Self {
            store: Arc::new(store),
            config,
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
        })
    }

    fn public_url(&self, path: &str) -> String {
        let full_path = format!("{}{}", self.config.path_prefix, path);
        match &self.config.custom_domain {
            Some(domain) => format!("https://{domain}/{full_path}"),
            None => format!(
                "https://{}.{}.aliyuncs.com/{}",
                self.config.bucket, self.config.region, full_path
            ),
        }
    }

    fn object_path(&self, path: &str) -> ObjectPath {
        ObjectPath::from(format!("{}{}", self.config.path_prefix, path))
    }
}

#[async_trait]
impl ObjectStore for AliyunOssAdapter {
    #[tracing::instrument(skip(self, buffer), fields(path = %path, bytes = buffer.len()))]
    async fn upload(&self, buffer: Vec<u8>, path: &str, content_type: &str) -> Result<UploadedObject> {
        let object_path = self.object_path(path);
        let payload = PutPayload::from_bytes(buffer.into());
        let mut backoff = LinearBackoff::new(self.retry_delay);

        let mut last_err = None;
        for attempt in 1..=self.max_retries {
            let put = self
                .store
                .put_opts(&object_path, payload.clone(), object_store::PutOptions::default());
            match put.await {
                Ok(_) => {
                    tracing::info!(attempt, path = %object_path, "upload succeeded");
                    return Ok(UploadedObject {
                        url: self.public_url(path),
                        stored_path: object_path.to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "upload attempt failed");
                    last_err = Some(e);
                    if attempt < self.max_retries {
                        backoff.sleep_and_advance().await;
                    }
                }
            }
        }
        let _ = content_type;
        Err(ServiceError::Processing(format!(
            "upload failed after {} attempts: {}",
            self.max_retries,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    #[tracing::instrument(skip(self), fields(path = %path))]
    async fn delete(&self, path: &str) -> Result<()> {
        let object_path = self.object_path(path);
        let mut backoff = LinearBackoff::new(self.retry_delay);

        let mut last_err = None;
        for attempt in 1..=self.max_retries {
            match self.store.delete(&object_path).await {
                Ok(()) => return Ok(()),
                // Already gone: treated as a successful delete.
                Err(object_store::Error::NotFound { .. }) => return Ok(()),
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "delete attempt failed");
                    last_err = Some(e);
                    if attempt < self.max_retries {
                        backoff.sleep_and_advance().await;
                    }
                }
            }
        }
        Err(ServiceError::Cleanup(format!(
            "delete failed after {} attempts: {}",
            self.max_retries,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    async fn test_connection(&self) -> Result<bool> {
        let probe = ObjectPath::from("__connectivity_probe__");
        match self.store.head(&probe).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(true),
            Err(e) => Err(ServiceError::ObjectStore(e)),
        }
    }
}

/// In-memory test double. No retries, no backoff; used by unit and
/// integration tests in place of a real network-backed store.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: parking_lot::Mutex<std::collections::HashMap<String, Vec<u8>>>,
    deleted: parking_lot::Mutex<Vec<String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().contains_key(path)
    }

    pub fn deleted_paths(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, buffer: Vec<u8>, path: &str, _content_type: &str) -> Result<UploadedObject> {
        self.objects.lock().insert(path.to_string(), buffer);
        Ok(UploadedObject {
            url: format!("https://example-bucket.oss-cn-hangzhou.aliyuncs.com/{path}"),
            stored_path: path.to_string(),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.objects.lock().remove(path);
        self.deleted.lock().push(path.to_string());
        Ok(())
    }

    async fn test_connection(&self) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_is_unique_across_calls() {
        let a = generate_file_name("task-1", "png");
        let b = generate_file_name("task-1", "png");
        assert_ne!(a, b);
        assert!(a.starts_with("task-1_"));
        assert!(a.ends_with(".png"));
    }

    #[tokio::test]
    async fn memory_store_round_trips_upload_and_delete() {
        let store = MemoryObjectStore::new();
        store.upload(vec![1, 2, 3], "a/b.png", "image/png").await.unwrap();
        assert!(store.contains("a/b.png"));

        store.delete("a/b.png").await.unwrap();
        assert!(!store.contains("a/b.png"));
        assert_eq!(store.deleted_paths(), vec!["a/b.png".to_string()]);
    }
}
