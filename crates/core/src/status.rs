use crate::models::{Details, ProcessingStatus};
use crate::traits::DocumentStore;
use crate::PipelineError;
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

/// Shallow merge: keys in `update` win, keys only in `current` survive.
pub fn merge_details(mut current: Details, update: Details) -> Details {
    for (key, value) in update {
        current.insert(key, value);
    }
    current
}

pub struct StatusTracker<S> {
    store: S,
}

impl<S> StatusTracker<S>
where
    S: DocumentStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn update_status(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        details: Option<Details>,
    ) -> Result<(), PipelineError> {
        let details = details.unwrap_or_default();
        let keys = details.keys().cloned().collect::<Vec<_>>();

        self.store.merge_status(document_id, status, details).await?;

        info!(document_id, status = %status, detail_keys = ?keys, "document status updated");
        Ok(())
    }

    /// Records a `failed` transition with a readable description of `error`.
    pub async fn mark_failed(
        &self,
        document_id: &str,
        stage: ProcessingStatus,
        error: &PipelineError,
    ) -> Result<(), PipelineError> {
        warn!(document_id, stage = %stage, kind = error.kind(), error = %error, "document processing failed");

        let mut details = Details::new();
        details.insert("error".to_string(), failure_detail(stage, error));
        self.store
            .merge_status(document_id, ProcessingStatus::Failed, details)
            .await
    }
}

fn failure_detail(stage: ProcessingStatus, error: &PipelineError) -> Value {
    json!({
        "stage": stage.as_str(),
        "kind": error.kind(),
        "message": error.to_string(),
        "retryable": error.is_retryable(),
        "failed_at": Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::stores::MemoryDocumentStore;
    use serde_json::json;
    use std::sync::Arc;

    fn details(value: Value) -> Details {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn merge_keeps_untouched_keys_and_overwrites_shared_ones() {
        let current = details(json!({"partitioning": {"elements_found": 3}, "source": "s3"}));
        let update = details(json!({"source": "url", "chunking": {"total_chunks": 2}}));

        let merged = merge_details(current, update);

        assert_eq!(merged["partitioning"], json!({"elements_found": 3}));
        assert_eq!(merged["source"], json!("url"));
        assert_eq!(merged["chunking"], json!({"total_chunks": 2}));
    }

    #[tokio::test]
    async fn update_status_never_clobbers_earlier_details() {
        let store = MemoryDocumentStore::default();
        store.insert(Document::file("doc-1", "k", "a.pdf"));
        let tracker = StatusTracker::new(store);

        tracker
            .update_status(
                "doc-1",
                ProcessingStatus::Chunking,
                Some(details(json!({"partitioning": {"elements_found": {"text": 4}}}))),
            )
            .await
            .expect("first update");
        tracker
            .update_status(
                "doc-1",
                ProcessingStatus::Summarizing,
                Some(details(json!({"chunking": {"total_chunks": 2}}))),
            )
            .await
            .expect("second update");

        let stored = tracker.store().snapshot("doc-1").expect("document exists");
        assert_eq!(stored.processing_status, ProcessingStatus::Summarizing);
        assert!(stored.processing_details.contains_key("partitioning"));
        assert!(stored.processing_details.contains_key("chunking"));
    }

    #[tokio::test]
    async fn update_status_on_unknown_document_is_not_found() {
        let tracker = StatusTracker::new(MemoryDocumentStore::default());
        let result = tracker
            .update_status("missing", ProcessingStatus::Partitioning, None)
            .await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[tokio::test]
    async fn mark_failed_records_error_kind() {
        let store = MemoryDocumentStore::default();
        store.insert(Document::file("doc-1", "k", "a.pdf"));
        let tracker = StatusTracker::new(store);

        tracker
            .mark_failed(
                "doc-1",
                ProcessingStatus::Partitioning,
                &PipelineError::Partition("bad xref".to_string()),
            )
            .await
            .expect("failure recorded");

        let stored = tracker.store().snapshot("doc-1").expect("document exists");
        assert_eq!(stored.processing_status, ProcessingStatus::Failed);
        assert_eq!(stored.processing_details["error"]["kind"], json!("partition_error"));
        assert_eq!(stored.processing_details["error"]["stage"], json!("partitioning"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_on_different_documents_are_isolated() {
        let store = MemoryDocumentStore::default();
        store.insert(Document::file("doc-a", "a", "a.pdf"));
        store.insert(Document::file("doc-b", "b", "b.pdf"));
        let tracker = Arc::new(StatusTracker::new(store));

        let mut handles = Vec::new();
        for round in 0..50 {
            for id in ["doc-a", "doc-b"] {
                let tracker = Arc::clone(&tracker);
                handles.push(tokio::spawn(async move {
                    let mut update = Details::new();
                    update.insert(format!("{id}-{round}"), json!(round));
                    tracker
                        .update_status(id, ProcessingStatus::Chunking, Some(update))
                        .await
                }));
            }
        }
        for handle in handles {
            handle.await.expect("task joins").expect("update succeeds");
        }

        let a = tracker.store().snapshot("doc-a").expect("doc-a");
        let b = tracker.store().snapshot("doc-b").expect("doc-b");
        assert_eq!(a.processing_details.len(), 50);
        assert_eq!(b.processing_details.len(), 50);
        assert!(a.processing_details.keys().all(|key| key.starts_with("doc-a")));
        assert!(b.processing_details.keys().all(|key| key.starts_with("doc-b")));
    }
}
