//! `project_documents` / `project_settings` over a Supabase (PostgREST) API.
//!
//! Status merges go through the `merge_document_status` database function so
//! the read-merge-write happens in one statement:
//!
//! ```sql
//! create function merge_document_status(document_id uuid, new_status text, new_details jsonb)
//! returns boolean language sql as $$
//!   with updated as (
//!     update project_documents
//!        set processing_status = new_status,
//!            processing_details = coalesce(processing_details, '{}'::jsonb) || new_details
//!      where id = document_id
//!     returning id)
//!   select exists(select 1 from updated);
//! $$;
//! ```

use crate::models::{Details, Document, EmbeddingSettings, ProcessingStatus};
use crate::traits::DocumentStore;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const DOCUMENTS_TABLE: &str = "project_documents";
const SETTINGS_TABLE: &str = "project_settings";
const MERGE_FUNCTION: &str = "merge_document_status";

pub struct PostgrestDocumentStore {
    client: Arc<Client>,
    endpoint: String,
    service_key: String,
}

impl PostgrestDocumentStore {
    pub fn new(endpoint: impl Into<String>, service_key: impl Into<String>) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client: Arc::new(client),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn select_first<T: DeserializeOwned>(
        &self,
        table: &str,
        column: &str,
        value: &str,
    ) -> Result<Option<T>, PipelineError> {
        let request = self
            .client
            .get(format!("{}/rest/v1/{}", self.endpoint, table))
            .query(&[("select", "*".to_string()), (column, format!("eq.{value}"))]);

        let response = checked(self.authorized(request).send().await?, table).await?;
        let mut rows: Vec<T> = response.json().await?;
        Ok(if rows.is_empty() { None } else { Some(rows.swap_remove(0)) })
    }
}

#[async_trait]
impl DocumentStore for PostgrestDocumentStore {
    async fn get_document(&self, document_id: &str) -> Result<Document, PipelineError> {
        self.select_first(DOCUMENTS_TABLE, "id", document_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("document {document_id}")))
    }

    async fn merge_status(
        &self,
        document_id: &str,
        status: ProcessingStatus,
        details: Details,
    ) -> Result<(), PipelineError> {
        let request = self
            .client
            .post(format!("{}/rest/v1/rpc/{}", self.endpoint, MERGE_FUNCTION))
            .json(&json!({
                "document_id": document_id,
                "new_status": status.as_str(),
                "new_details": Value::Object(details),
            }));

        let response = checked(self.authorized(request).send().await?, MERGE_FUNCTION).await?;
        let updated: Value = response.json().await?;

        if updated.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(PipelineError::NotFound(format!("document {document_id}")))
        }
    }

    async fn project_settings(
        &self,
        project_id: &str,
    ) -> Result<Option<EmbeddingSettings>, PipelineError> {
        self.select_first(SETTINGS_TABLE, "project_id", project_id).await
    }
}

async fn checked(response: Response, resource: &str) -> Result<Response, PipelineError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, resource, &body))
}

fn classify_status(status: StatusCode, resource: &str, body: &str) -> PipelineError {
    if status == StatusCode::NOT_FOUND {
        PipelineError::NotFound(format!("{resource}: {body}"))
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        PipelineError::StorageUnavailable(format!("{resource} returned {status}: {body}"))
    } else {
        PipelineError::Internal(format!("{resource} rejected request with {status}: {body}"))
    }
}
