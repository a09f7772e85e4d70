pub mod acquire;
pub mod analyzer;
pub mod chunking;
pub mod config;
pub mod error;
pub mod lease;
pub mod models;
pub mod orchestrator;
pub mod partition;
pub mod status;
pub mod stores;
pub mod traits;
pub mod worker;

pub use acquire::{ContentHandle, FetchPolicy, SourceAcquirer};
pub use analyzer::analyze;
pub use chunking::{chunk_by_title, split_oversized, ChunkingConfig, TitleChunker, ELEMENT_SEPARATOR};
pub use config::WorkerConfig;
pub use error::PipelineError;
pub use lease::{DocumentLeases, LeaseGuard};
pub use models::{
    Chunk, ChunkingMetrics, Details, Document, Element, ElementCategory, ElementCensus,
    ElementMetadata, EmbeddingSettings, JobOutcome, JobStatus, ProcessingStatus, SourceType,
};
pub use orchestrator::{CancelFlag, IngestionPipeline};
pub use partition::{
    partition_with_limits, DocumentFormat, DocxPartitioner, HtmlPartitioner, PartitionLimits,
    Partitioner, PartitionerRegistry, PdfPartitioner,
};
pub use status::{merge_details, StatusTracker};
pub use stores::{FsBlobStore, HttpBlobStore, MemoryDocumentStore, PostgrestDocumentStore};
pub use traits::{BlobStore, DocumentStore, DownstreamStage};
pub use worker::{JobWorker, WorkerOptions, WorkerSummary};
