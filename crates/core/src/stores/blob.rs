use crate::traits::BlobStore;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Buckets are directories under `root`, keys are relative paths inside them.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, PipelineError> {
        let relative = Path::new(bucket).join(key);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if escapes {
            return Err(PipelineError::NotFound(format!("invalid object key {bucket}/{key}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64, PipelineError> {
        let source = self.object_path(bucket, key)?;
        tokio::fs::copy(&source, destination)
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => PipelineError::NotFound(format!("object {bucket}/{key}")),
                _ => PipelineError::StorageUnavailable(format!(
                    "reading {}: {error}",
                    source.display()
                )),
            })
    }
}

/// S3-compatible gateway addressed as `{endpoint}/{bucket}/{key}`.
pub struct HttpBlobStore {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpBlobStore {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
        })
    }
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64, PipelineError> {
        let mut request = self
            .client
            .get(format!("{}/{}/{}", self.endpoint, bucket, key.trim_start_matches('/')));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let mut response = request.send().await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(PipelineError::NotFound(format!("object {bucket}/{key}")));
            }
            status => {
                return Err(PipelineError::StorageUnavailable(format!(
                    "object store returned {status} for {bucket}/{key}"
                )));
            }
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        while let Some(bytes) = response.chunk().await? {
            file.write_all(&bytes).await?;
            written += bytes.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}
