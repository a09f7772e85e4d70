//! Queue consumer that runs ingestion jobs with bounded concurrency.
//!
//! Each message on the channel is a document id. A job whose failure is
//! retryable is run again after an exponential backoff until `max_retries`
//! is spent; every other outcome is final.

use crate::models::JobOutcome;
use crate::orchestrator::{CancelFlag, IngestionPipeline};
use crate::traits::{BlobStore, DocumentStore};
use crate::PipelineError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: usize,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_retries: 2,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Extra attempts spent on retryable failures.
    pub retries: usize,
    pub outcomes: Vec<JobOutcome>,
}

impl WorkerSummary {
    fn record(&mut self, outcome: JobOutcome, retries: usize) {
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.retries += retries;
        self.outcomes.push(outcome);
    }
}

pub struct JobWorker<S, B>
where
    S: DocumentStore,
    B: BlobStore,
{
    pipeline: Arc<IngestionPipeline<S, B>>,
    options: WorkerOptions,
    cancel: CancelFlag,
}

impl<S, B> JobWorker<S, B>
where
    S: DocumentStore + 'static,
    B: BlobStore + 'static,
{
    pub fn new(pipeline: Arc<IngestionPipeline<S, B>>, options: WorkerOptions) -> Result<Self, PipelineError> {
        if options.concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "worker concurrency must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            pipeline,
            options,
            cancel: CancelFlag::default(),
        })
    }

    /// Flag shared with every job this worker starts.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Consumes document ids until the channel closes, then waits for the
    /// jobs still in flight.
    pub async fn run(&self, mut receiver: mpsc::Receiver<String>) -> WorkerSummary {
        info!(
            concurrency = self.options.concurrency,
            max_retries = self.options.max_retries,
            "job worker started"
        );

        let permits = Arc::new(Semaphore::new(self.options.concurrency));
        let mut jobs = JoinSet::new();
        let mut summary = WorkerSummary::default();

        while let Some(document_id) = receiver.recv().await {
            let permit = match Arc::clone(&permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(closed) => {
                    error!(error = %closed, "worker semaphore closed");
                    break;
                }
            };

            let pipeline = Arc::clone(&self.pipeline);
            let options = self.options.clone();
            let cancel = self.cancel.clone();
            jobs.spawn(async move {
                let result = run_with_retries(&pipeline, &document_id, &options, &cancel).await;
                drop(permit);
                result
            });

            while let Some(finished) = jobs.try_join_next() {
                collect(&mut summary, finished);
            }
        }

        while let Some(finished) = jobs.join_next().await {
            collect(&mut summary, finished);
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            retries = summary.retries,
            "job worker drained"
        );
        summary
    }
}

fn collect(summary: &mut WorkerSummary, finished: Result<(JobOutcome, usize), tokio::task::JoinError>) {
    match finished {
        Ok((outcome, retries)) => summary.record(outcome, retries),
        Err(join_error) => {
            error!(error = %join_error, "ingestion job aborted");
            summary.failed += 1;
        }
    }
}

async fn run_with_retries<S, B>(
    pipeline: &IngestionPipeline<S, B>,
    document_id: &str,
    options: &WorkerOptions,
    cancel: &CancelFlag,
) -> (JobOutcome, usize)
where
    S: DocumentStore,
    B: BlobStore,
{
    let mut retries = 0;
    loop {
        let outcome = pipeline.run_job(document_id, cancel).await;
        if outcome.is_success() || !outcome.retryable || retries >= options.max_retries as usize {
            return (outcome, retries);
        }

        let delay = options.retry_backoff * 2u32.saturating_pow(retries as u32);
        warn!(
            document_id,
            attempt = retries + 1,
            delay_ms = delay.as_millis() as u64,
            error = outcome.error.as_deref().unwrap_or_default(),
            "retrying ingestion job"
        );
        tokio::time::sleep(delay).await;
        retries += 1;
    }
}
