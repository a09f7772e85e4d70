use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub type Details = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    #[default]
    File,
    Url,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    #[serde(alias = "pending")]
    Queued,
    Partitioning,
    Chunking,
    #[serde(alias = "summarising")]
    Summarizing,
    Vectorizing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Partitioning => "partitioning",
            Self::Chunking => "chunking",
            Self::Summarizing => "summarizing",
            Self::Vectorizing => "vectorizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingestion target as stored in the `project_documents` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source_type: SourceType,
    #[serde(default, rename = "s3_key", alias = "storage_key")]
    pub storage_key: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default, rename = "source_url", alias = "url")]
    pub url: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub processing_status: ProcessingStatus,
    #[serde(default, deserialize_with = "null_as_default")]
    pub processing_details: Details,
}

impl Document {
    pub fn file(id: impl Into<String>, storage_key: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: String::new(),
            source_type: SourceType::File,
            storage_key: Some(storage_key.into()),
            filename: Some(filename.into()),
            url: None,
            processing_status: ProcessingStatus::Queued,
            processing_details: Details::new(),
        }
    }

    pub fn url(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            project_id: String::new(),
            source_type: SourceType::Url,
            storage_key: None,
            filename: None,
            url: Some(url.into()),
            processing_status: ProcessingStatus::Queued,
            processing_details: Details::new(),
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ElementCategory {
    NarrativeText,
    Text,
    Title,
    Header,
    ListItem,
    FigureCaption,
    Table,
    Image,
    Other,
}

impl ElementCategory {
    pub fn is_title(self) -> bool {
        matches!(self, Self::Title | Self::Header)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ElementMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading_level: Option<u8>,
    /// Table structure kept as HTML rather than flattened text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_as_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_continuation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Element {
    pub category: ElementCategory,
    pub text: String,
    #[serde(default)]
    pub metadata: ElementMetadata,
}

impl Element {
    pub fn new(category: ElementCategory, text: impl Into<String>) -> Self {
        Self {
            category,
            text: text.into(),
            metadata: ElementMetadata::default(),
        }
    }

    pub fn on_page(mut self, page: u32) -> Self {
        self.metadata.page_number = Some(page);
        self
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub index: usize,
    pub text: String,
    pub char_count: usize,
    pub elements: Vec<Element>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ElementCensus {
    pub text: usize,
    pub tables: usize,
    pub images: usize,
    pub titles: usize,
    pub other: usize,
}

impl ElementCensus {
    pub fn total(&self) -> usize {
        self.text + self.tables + self.images + self.titles + self.other
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChunkingMetrics {
    pub total_chunks: usize,
    pub total_elements: usize,
    pub min_chars: usize,
    pub max_chars: usize,
    pub mean_chars: f64,
    pub chunk_sizes: Vec<usize>,
}

/// Per-project retrieval settings handed untouched to downstream stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub embedding_model: String,
    pub rag_strategy: String,
    pub chunks_per_search: u32,
    pub final_context_size: u32,
    pub similarity_threshold: f64,
    pub number_of_queries: u32,
    pub reranking_enabled: bool,
    pub reranking_model: String,
    pub vector_weight: f64,
    pub keyword_weight: f64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            embedding_model: "text-embedding-3-large".to_string(),
            rag_strategy: "basic".to_string(),
            chunks_per_search: 10,
            final_context_size: 5,
            similarity_threshold: 0.3,
            number_of_queries: 5,
            reranking_enabled: true,
            reranking_model: "rerank-english-v3.0".to_string(),
            vector_weight: 0.7,
            keyword_weight: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobOutcome {
    pub status: JobStatus,
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub retryable: bool,
}

impl JobOutcome {
    pub fn success(document_id: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Success,
            document_id: document_id.into(),
            error: None,
            retryable: false,
        }
    }

    pub fn failure(document_id: impl Into<String>, error: &crate::PipelineError) -> Self {
        Self {
            status: JobStatus::Failure,
            document_id: document_id.into(),
            error: Some(error.to_string()),
            retryable: error.is_retryable(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}
