use crate::models::{Document, SourceType};
use crate::partition::DocumentFormat;
use crate::traits::BlobStore;
use crate::PipelineError;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

/// Bounds for fetching remote pages so one slow host cannot pin a worker.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub max_bytes: u64,
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_bytes: 25 * 1024 * 1024,
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Local copy of a document's content. The backing file is removed when the
/// handle is dropped.
#[derive(Debug)]
pub struct ContentHandle {
    file: NamedTempFile,
    pub format: DocumentFormat,
    pub byte_len: u64,
    pub source: String,
}

impl ContentHandle {
    /// Wraps an already-populated temporary file.
    pub fn new(file: NamedTempFile, format: DocumentFormat, source: impl Into<String>) -> Result<Self, PipelineError> {
        let byte_len = file.as_file().metadata()?.len();
        Ok(Self {
            file,
            format,
            byte_len,
            source: source.into(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

pub struct SourceAcquirer<B> {
    blobs: B,
    bucket: String,
    http: Client,
    policy: FetchPolicy,
    temp_dir: Option<PathBuf>,
}

impl<B> SourceAcquirer<B>
where
    B: BlobStore,
{
    pub fn new(blobs: B, bucket: impl Into<String>, policy: FetchPolicy) -> Result<Self, PipelineError> {
        let http = Client::builder()
            .timeout(policy.timeout)
            .connect_timeout(policy.timeout.min(Duration::from_secs(10)))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent(concat!("doc-ingest/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            blobs,
            bucket: bucket.into(),
            http,
            policy,
            temp_dir: None,
        })
    }

    /// Places temporary files in `dir` instead of the system default.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    pub async fn acquire(&self, document: &Document) -> Result<ContentHandle, PipelineError> {
        match document.source_type {
            SourceType::File => self.acquire_file(document).await,
            SourceType::Url => self.acquire_url(document).await,
        }
    }

    async fn acquire_file(&self, document: &Document) -> Result<ContentHandle, PipelineError> {
        let key = document.storage_key.as_deref().ok_or_else(|| {
            PipelineError::NotFound(format!("document {} has no storage key", document.id))
        })?;
        let filename = document.filename.as_deref().ok_or_else(|| {
            PipelineError::NotFound(format!("document {} has no filename", document.id))
        })?;
        let format = DocumentFormat::from_filename(filename)?;

        let file = self.temp_file(&document.id, format)?;
        let byte_len = self.blobs.fetch(&self.bucket, key, file.path()).await?;
        debug!(document_id = %document.id, key, byte_len, "downloaded blob");

        Ok(ContentHandle {
            file,
            format,
            byte_len,
            source: format!("{}/{}", self.bucket, key),
        })
    }

    async fn acquire_url(&self, document: &Document) -> Result<ContentHandle, PipelineError> {
        let raw = document.url.as_deref().ok_or_else(|| {
            PipelineError::NotFound(format!("document {} has no source url", document.id))
        })?;
        let url = Url::parse(raw)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::UnsupportedFormat(format!(
                "url scheme {} is not fetchable",
                url.scheme()
            )));
        }

        let file = self.temp_file(&document.id, DocumentFormat::Url)?;
        let byte_len = self.fetch_with_retry(&url, file.path()).await?;
        debug!(document_id = %document.id, url = %url, byte_len, "fetched url");

        Ok(ContentHandle {
            file,
            format: DocumentFormat::Url,
            byte_len,
            source: url.to_string(),
        })
    }

    async fn fetch_with_retry(&self, url: &Url, destination: &Path) -> Result<u64, PipelineError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.backoff;

        for attempt in 1..=attempts {
            match self.fetch_once(url, destination).await {
                Ok(bytes) => return Ok(bytes),
                Err(error) if error.is_retryable() && attempt < attempts => {
                    warn!(url = %url, attempt, error = %error, "url fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(error) => return Err(error),
            }
        }

        Err(PipelineError::StorageUnavailable(format!("gave up fetching {url}")))
    }

    async fn fetch_once(&self, url: &Url, destination: &Path) -> Result<u64, PipelineError> {
        let mut response = self.http.get(url.clone()).send().await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(PipelineError::NotFound(format!("{url} returned {}", response.status())));
            }
            status if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS => {
                return Err(PipelineError::StorageUnavailable(format!("{url} returned {status}")));
            }
            status => {
                return Err(PipelineError::UnsupportedFormat(format!("{url} returned {status}")));
            }
        }

        if let Some(length) = response.content_length() {
            if length > self.policy.max_bytes {
                return Err(too_large(url, self.policy.max_bytes));
            }
        }

        let mut file = tokio::fs::File::create(destination).await?;
        let mut written = 0u64;
        while let Some(bytes) = response.chunk().await? {
            written += bytes.len() as u64;
            if written > self.policy.max_bytes {
                return Err(too_large(url, self.policy.max_bytes));
            }
            file.write_all(&bytes).await?;
        }
        file.flush().await?;

        Ok(written)
    }

    fn temp_file(&self, document_id: &str, format: DocumentFormat) -> Result<NamedTempFile, PipelineError> {
        let prefix = format!("{}-", sanitize(document_id));
        let suffix = format!(".{}", format.extension());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix).suffix(&suffix);

        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        Ok(file)
    }
}

fn too_large(url: &Url, limit: u64) -> PipelineError {
    PipelineError::UnsupportedFormat(format!("{url} exceeds the {limit} byte limit"))
}

fn sanitize(document_id: &str) -> String {
    document_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::FsBlobStore;
    use tempfile::tempdir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|items| items.count()).unwrap_or(0)
    }

    /// Serves `response` verbatim to every connection.
    async fn serve(response: String) -> std::io::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buffer = [0u8; 2048];
                let _ = socket.read(&mut buffer).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        Ok(format!("http://{address}/page"))
    }

    fn quick_policy() -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_secs(5),
            max_bytes: 64,
            max_attempts: 2,
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn file_source_downloads_into_scoped_temp_file() -> Result<(), Box<dyn std::error::Error>> {
        let blobs = tempdir()?;
        std::fs::create_dir_all(blobs.path().join("bucket"))?;
        std::fs::write(blobs.path().join("bucket/k1"), b"<h1>Hello</h1>")?;
        let scratch = tempdir()?;

        let acquirer = SourceAcquirer::new(FsBlobStore::new(blobs.path()), "bucket", quick_policy())?
            .with_temp_dir(scratch.path());
        let handle = acquirer
            .acquire(&Document::file("doc-1", "k1", "Page.HTML"))
            .await?;

        assert_eq!(handle.format, DocumentFormat::Html);
        assert_eq!(handle.byte_len, 14);
        assert_eq!(entries(scratch.path()), 1);

        drop(handle);
        assert_eq!(entries(scratch.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_blob_is_not_found_and_leaves_nothing_behind() -> Result<(), Box<dyn std::error::Error>> {
        let blobs = tempdir()?;
        let scratch = tempdir()?;
        let acquirer = SourceAcquirer::new(FsBlobStore::new(blobs.path()), "bucket", quick_policy())?
            .with_temp_dir(scratch.path());

        let result = acquirer
            .acquire(&Document::file("doc-1", "missing-key", "report.pdf"))
            .await;

        assert!(matches!(result, Err(PipelineError::NotFound(_))));
        assert_eq!(entries(scratch.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_extension_is_rejected_before_download() -> Result<(), Box<dyn std::error::Error>> {
        let blobs = tempdir()?;
        let scratch = tempdir()?;
        let acquirer = SourceAcquirer::new(FsBlobStore::new(blobs.path()), "bucket", quick_policy())?
            .with_temp_dir(scratch.path());

        let result = acquirer.acquire(&Document::file("doc-1", "k", "notes")).await;

        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
        assert_eq!(entries(scratch.path()), 0);
        Ok(())
    }

    #[tokio::test]
    async fn url_source_is_fetched_as_url_format() -> Result<(), Box<dyn std::error::Error>> {
        let body = "<p>crawled</p>";
        let url = serve(format!(
            "HTTP/1.1 200 OK\r\ncontent-type: text/html\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        ))
        .await?;
        let blobs = tempdir()?;
        let acquirer = SourceAcquirer::new(FsBlobStore::new(blobs.path()), "bucket", quick_policy())?;

        let handle = acquirer.acquire(&Document::url("doc-u", url)).await?;

        assert_eq!(handle.format, DocumentFormat::Url);
        assert_eq!(std::fs::read_to_string(handle.path())?, body);
        Ok(())
    }

    #[tokio::test]
    async fn oversized_url_body_is_refused() -> Result<(), Box<dyn std::error::Error>> {
        let body = "x".repeat(200);
        let url = serve(format!(
            "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            body.len(),
            body
        ))
        .await?;
        let blobs = tempdir()?;
        let acquirer = SourceAcquirer::new(FsBlobStore::new(blobs.path()), "bucket", quick_policy())?;

        let result = acquirer.acquire(&Document::url("doc-u", url)).await;
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
        Ok(())
    }

    #[tokio::test]
    async fn missing_page_is_not_found() -> Result<(), Box<dyn std::error::Error>> {
        let url = serve(
            "HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_string(),
        )
        .await?;
        let blobs = tempdir()?;
        let acquirer = SourceAcquirer::new(FsBlobStore::new(blobs.path()), "bucket", quick_policy())?;

        let result = acquirer.acquire(&Document::url("doc-u", url)).await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn non_http_scheme_is_unsupported() -> Result<(), Box<dyn std::error::Error>> {
        let blobs = tempdir()?;
        let acquirer = SourceAcquirer::new(FsBlobStore::new(blobs.path()), "bucket", quick_policy())?;

        let result = acquirer
            .acquire(&Document::url("doc-u", "ftp://example.com/file"))
            .await;
        assert!(matches!(result, Err(PipelineError::UnsupportedFormat(_))));
        Ok(())
    }
}
