use crate::models::{Details, Document, EmbeddingSettings, ProcessingStatus};
use crate::status::merge_details;
use crate::traits::DocumentStore;
use crate::PipelineError;
use async_trait::async_trait;
use dashmap::DashMap;

/// In-process document table. Each row is updated under its shard lock, so
/// a status merge is a single transition for concurrent readers.
#[derive(Default)]
pub struct MemoryDocumentStore {
    documents: DashMap<String, Document>,
    settings: DashMap<String, EmbeddingSettings>,
}

impl MemoryDocumentStore {
    pub fn insert(&self, document: Document) {
        self.documents.insert(document.id.clone(), document);
    }

    pub fn insert_settings(&self, project_id: impl Into<String>, settings: EmbeddingSettings) {
        self.settings.insert(project_id.into(), settings);
    }

    pub fn snapshot(&self, document_id: &str) -> Option<Document> {
        self.documents.get(document_id).map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get_document(&self, document_id: &str) -> Result<Document, PipelineError> {
        self.snapshot(document_id)
            .ok_or_else(|| PipelineError::NotFound(format!("document {document_id}")))
    }

    async fn merge_status(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        details: Details,
    ) -> Result<(), PipelineError> {
        let mut row = self
            .documents
            .get_mut(document_id)
            .ok_or_else(|| PipelineError::NotFound(format!("document {document_id}")))?;

        let current = std::mem::take(&mut row.processing_details);
        row.processing_details = merge_details(current, details);
        row.processing_status = status;
        Ok(())
    }

    async fn project_settings(
        &self,
        project_id: &str,
    ) -> Result<Option<EmbeddingSettings>, PipelineError> {
        Ok(self.settings.get(project_id).map(|entry| entry.value().clone()))
    }
}
