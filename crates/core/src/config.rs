//! Environment-driven worker configuration.

use crate::acquire::FetchPolicy;
use crate::chunking::ChunkingConfig;
use crate::partition::PartitionLimits;
use crate::worker::WorkerOptions;
use crate::PipelineError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BUCKET: &str = "documents";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// PostgREST base URL of the document table.
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub bucket: String,
    /// HTTP object storage endpoint; takes precedence over `blob_dir`.
    pub blob_endpoint: Option<String>,
    pub blob_token: Option<String>,
    pub blob_dir: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub chunking: ChunkingConfig,
    pub fetch: FetchPolicy,
    pub partition: PartitionLimits,
    pub worker: WorkerOptions,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_service_key: None,
            bucket: DEFAULT_BUCKET.to_string(),
            blob_endpoint: None,
            blob_token: None,
            blob_dir: None,
            temp_dir: None,
            chunking: ChunkingConfig::default(),
            fetch: FetchPolicy::default(),
            partition: PartitionLimits::default(),
            worker: WorkerOptions::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source; unset or blank variables
    /// keep their defaults, malformed numbers are rejected.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PipelineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|value| value.trim().to_string()).filter(|value| !value.is_empty());
        let defaults = Self::default();

        let config = Self {
            supabase_url: var("SUPABASE_API_URL"),
            supabase_service_key: var("SUPABASE_SERVICE_KEY"),
            bucket: var("S3_BUCKET_NAME").unwrap_or(defaults.bucket),
            blob_endpoint: var("AWS_ENDPOINT_URL_S3"),
            blob_token: var("BLOB_TOKEN"),
            blob_dir: var("BLOB_DIR").map(PathBuf::from),
            temp_dir: var("INGEST_TEMP_DIR").map(PathBuf::from),
            chunking: ChunkingConfig {
                max_chars: parsed(&var, "CHUNK_MAX_CHARS", defaults.chunking.max_chars)?,
                soft_break_chars: parsed(&var, "CHUNK_SOFT_BREAK_CHARS", defaults.chunking.soft_break_chars)?,
                merge_below_chars: parsed(&var, "CHUNK_MERGE_BELOW_CHARS", defaults.chunking.merge_below_chars)?,
            },
            fetch: FetchPolicy {
                timeout: Duration::from_secs(parsed(&var, "FETCH_TIMEOUT_SECS", defaults.fetch.timeout.as_secs())?),
                max_bytes: parsed(&var, "FETCH_MAX_BYTES", defaults.fetch.max_bytes)?,
                ..defaults.fetch
            },
            partition: PartitionLimits {
                timeout: Duration::from_secs(parsed(
                    &var,
                    "PARTITION_TIMEOUT_SECS",
                    defaults.partition.timeout.as_secs(),
                )?),
                ..defaults.partition
            },
            worker: WorkerOptions {
                concurrency: parsed(&var, "WORKER_CONCURRENCY", defaults.worker.concurrency)?,
                max_retries: parsed(&var, "WORKER_MAX_RETRIES", defaults.worker.max_retries)?,
                ..defaults.worker
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        self.chunking.validate()?;
        if self.worker.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "WORKER_CONCURRENCY must be at least 1".to_string(),
            ));
        }
        if self.supabase_url.is_some() && self.supabase_service_key.is_none() {
            return Err(PipelineError::InvalidConfig(
                "SUPABASE_SERVICE_KEY is required with SUPABASE_API_URL".to_string(),
            ));
        }
        Ok(())
    }
}

fn parsed<T, V>(var: &V, name: &str, default: T) -> Result<T, PipelineError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    V: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(raw) => raw
            .parse()
            .map_err(|error| PipelineError::InvalidConfig(format!("{name}={raw}: {error}"))),
        None => Ok(default),
    }
}
