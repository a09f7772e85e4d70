use crate::acquire::SourceAcquirer;
use crate::analyzer::analyze;
use crate::chunking::TitleChunker;
use crate::lease::DocumentLeases;
use crate::models::{Chunk, Details, Document, EmbeddingSettings, JobOutcome, ProcessingStatus};
use crate::partition::{partition_with_limits, PartitionLimits, PartitionerRegistry};
use crate::status::StatusTracker;
use crate::traits::{BlobStore, DocumentStore, DownstreamStage};
use crate::PipelineError;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Cooperative cancellation, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn checkpoint(&self, next: ProcessingStatus) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            Err(PipelineError::Cancelled(next.as_str().to_string()))
        } else {
            Ok(())
        }
    }
}

pub struct IngestionPipeline<S, B>
where
    S: DocumentStore,
    B: BlobStore,
{
    tracker: StatusTracker<S>,
    acquirer: SourceAcquirer<B>,
    partitioners: PartitionerRegistry,
    chunker: TitleChunker,
    downstream: Vec<Arc<dyn DownstreamStage>>,
    leases: DocumentLeases,
    limits: PartitionLimits,
}

impl<S, B> IngestionPipeline<S, B>
where
    S: DocumentStore,
    B: BlobStore,
{
    pub fn new(
        tracker: StatusTracker<S>,
        acquirer: SourceAcquirer<B>,
        partitioners: PartitionerRegistry,
        chunker: TitleChunker,
    ) -> Self {
        Self {
            tracker,
            acquirer,
            partitioners,
            chunker,
            downstream: Vec::new(),
            leases: DocumentLeases::default(),
            limits: PartitionLimits::default(),
        }
    }

    pub fn with_stage(mut self, stage: Arc<dyn DownstreamStage>) -> Self {
        self.downstream.push(stage);
        self
    }

    /// Shares a lease registry with other pipelines in the same process.
    pub fn with_leases(mut self, leases: DocumentLeases) -> Self {
        self.leases = leases;
        self
    }

    pub fn with_partition_limits(mut self, limits: PartitionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn tracker(&self) -> &StatusTracker<S> {
        &self.tracker
    }

    pub fn leases(&self) -> &DocumentLeases {
        &self.leases
    }

    /// Runs one job and folds any error into a failure outcome.
    pub async fn run_job(&self, document_id: &str, cancel: &CancelFlag) -> JobOutcome {
        match self.process_document(document_id, cancel).await {
            Ok(outcome) => outcome,
            Err(error) => JobOutcome::failure(document_id, &error),
        }
    }

    /// Every error after the lease is taken is recorded as `failed` before it
    /// is returned.
    pub async fn process_document(
        &self,
        document_id: &str,
        cancel: &CancelFlag,
    ) -> Result<JobOutcome, PipelineError> {
        let _lease = self
            .leases
            .try_acquire(document_id)
            .ok_or_else(|| PipelineError::JobInProgress(document_id.to_string()))?;

        let span = info_span!("ingest", document_id, job_id = %Uuid::new_v4());
        let mut stage = ProcessingStatus::Queued;
        let result = self
            .run_stages(document_id, cancel, &mut stage)
            .instrument(span)
            .await;

        match result {
            Ok(()) => {
                info!(document_id, "document processed");
                Ok(JobOutcome::success(document_id))
            }
            Err(failure) => {
                if let Err(record_error) = self.tracker.mark_failed(document_id, stage, &failure).await {
                    error!(
                        document_id,
                        error = %record_error,
                        original = %failure,
                        "could not record failed status"
                    );
                }
                Err(failure)
            }
        }
    }

    async fn run_stages(
        &self,
        document_id: &str,
        cancel: &CancelFlag,
        stage: &mut ProcessingStatus,
    ) -> Result<(), PipelineError> {
        let document = self.tracker.store().get_document(document_id).await?;

        cancel.checkpoint(ProcessingStatus::Partitioning)?;
        *stage = ProcessingStatus::Partitioning;
        // A rerun after a failed attempt clears the old failure record.
        let restart = document
            .processing_details
            .contains_key("error")
            .then(|| details("error", Value::Null));
        self.tracker.update_status(document_id, *stage, restart).await?;

        let handle = self.acquirer.acquire(&document).await?;
        let elements = partition_with_limits(&self.partitioners, &handle, &self.limits).await?;
        let (format, bytes) = (handle.format, handle.byte_len);
        drop(handle);

        let census = analyze(&elements);
        cancel.checkpoint(ProcessingStatus::Chunking)?;
        *stage = ProcessingStatus::Chunking;
        self.tracker
            .update_status(
                document_id,
                *stage,
                Some(details("partitioning", json!({
                    "elements_found": census,
                    "total_elements": census.total(),
                    "format": format,
                    "bytes": bytes,
                }))),
            )
            .await?;

        let (chunks, metrics) = self.chunker.chunk(&elements);
        if chunks.is_empty() {
            return Err(PipelineError::Partition(format!(
                "{} elements produced no text to chunk",
                elements.len()
            )));
        }
        info!(document_id, elements = elements.len(), chunks = chunks.len(), "chunked document");

        cancel.checkpoint(ProcessingStatus::Summarizing)?;
        *stage = ProcessingStatus::Summarizing;
        self.tracker
            .update_status(document_id, *stage, Some(details("chunking", serde_json::to_value(&metrics)?)))
            .await?;

        let settings = self
            .tracker
            .store()
            .project_settings(&document.project_id)
            .await?
            .unwrap_or_default();

        let summary = self.run_downstream(ProcessingStatus::Summarizing, &document, &chunks, &settings).await?;
        cancel.checkpoint(ProcessingStatus::Vectorizing)?;
        *stage = ProcessingStatus::Vectorizing;
        self.tracker
            .update_status(document_id, *stage, Some(details("summarizing", summary)))
            .await?;

        let vectors = self.run_downstream(ProcessingStatus::Vectorizing, &document, &chunks, &settings).await?;
        *stage = ProcessingStatus::Completed;
        self.tracker
            .update_status(document_id, *stage, Some(details("vectorizing", vectors)))
            .await
    }

    /// Runs the stages registered for `stage`; with none registered the stage
    /// is recorded as skipped.
    async fn run_downstream(
        &self,
        stage: ProcessingStatus,
        document: &Document,
        chunks: &[Chunk],
        settings: &EmbeddingSettings,
    ) -> Result<Value, PipelineError> {
        let mut recorded = Details::new();
        let mut ran = false;

        for downstream in self.downstream.iter().filter(|candidate| candidate.stage() == stage) {
            let output = downstream.run(document, chunks, settings).await?;
            recorded.extend(output);
            ran = true;
        }

        if !ran {
            return Ok(json!({"skipped": true, "reason": "no stage configured"}));
        }
        Ok(Value::Object(recorded))
    }
}

fn details(key: &str, value: Value) -> Details {
    let mut details = Details::new();
    details.insert(key.to_string(), value);
    details
}
