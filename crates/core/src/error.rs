use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("partition error: {0}")]
    Partition(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("job cancelled before {0}")]
    Cancelled(String),

    #[error("document {0} is already being processed")]
    JobInProgress(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PipelineError {
    /// Stable name written into the failure detail of a document.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::StorageUnavailable(_) | Self::Http(_) => "storage_unavailable",
            Self::UnsupportedFormat(_) | Self::InvalidUrl(_) => "unsupported_format",
            Self::Partition(_) => "partition_error",
            Self::Internal(_) | Self::Io(_) | Self::Serialization(_) | Self::Task(_) => "internal_error",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Cancelled(_) => "cancelled",
            Self::JobInProgress(_) => "job_in_progress",
        }
    }

    /// Only transient storage failures are worth handing back to the queue.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::Http(_))
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineError;
    use std::error::Error as _;

    #[test]
    fn only_storage_failures_are_retryable() {
        assert!(PipelineError::StorageUnavailable("s3 down".to_string()).is_retryable());
        assert!(!PipelineError::Partition("corrupt".to_string()).is_retryable());
        assert!(!PipelineError::UnsupportedFormat("xyz".to_string()).is_retryable());
        assert!(!PipelineError::NotFound("doc".to_string()).is_retryable());
    }

    #[test]
    fn io_errors_are_internal() {
        let error: PipelineError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert_eq!(error.kind(), "internal_error");
        assert!(!error.is_retryable());
    }

    #[test]
    fn converted_errors_keep_their_source() {
        let error: PipelineError = std::io::Error::new(std::io::ErrorKind::NotFound, "scratch dir").into();
        let source = error.source().expect("io error kept as source");
        assert_eq!(source.to_string(), "scratch dir");

        let error: PipelineError = url::Url::parse("not a url").unwrap_err().into();
        assert_eq!(error.kind(), "unsupported_format");
        assert!(error.source().is_some());
    }
}
