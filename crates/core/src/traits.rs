use crate::models::{Chunk, Details, Document, EmbeddingSettings, ProcessingStatus};
use crate::PipelineError;
use async_trait::async_trait;
use std::path::Path;

/// Relational record of documents and their project settings.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_document(&self, document_id: &str) -> Result<Document, PipelineError>;

    /// Writes `status` and shallow-merges `details` into the stored
    /// `processing_details` as one state transition.
    async fn merge_status(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        details: Details,
    ) -> Result<(), PipelineError>;

    async fn project_settings(
        &self,
        project_id: &str,
    ) -> Result<Option<EmbeddingSettings>, PipelineError>;
}

/// Read-only object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Copies `bucket/key` into `destination`, returning the byte count.
    async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64, PipelineError>;
}

/// A stage that runs after chunking (summarization, vectorization).
#[async_trait]
pub trait DownstreamStage: Send + Sync {
    fn stage(&self) -> ProcessingStatus;

    async fn run(
        &self,
        document: &Document,
        chunks: &[Chunk],
        settings: &EmbeddingSettings,
    ) -> Result<Details, PipelineError>;
}
