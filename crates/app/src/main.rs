use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_ingest_core::{
    analyze, BlobStore, CancelFlag, DocumentFormat, FsBlobStore, HttpBlobStore, IngestionPipeline,
    JobOutcome, JobWorker, PartitionerRegistry, PostgrestDocumentStore, SourceAcquirer,
    StatusTracker, TitleChunker, WorkerConfig,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-ingest-worker", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Object storage bucket (overrides S3_BUCKET_NAME).
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Serve blobs from this directory, one subdirectory per bucket (overrides BLOB_DIR).
    #[arg(long, global = true)]
    blob_dir: Option<PathBuf>,

    /// Jobs processed at once (overrides WORKER_CONCURRENCY).
    #[arg(long, global = true)]
    concurrency: Option<usize>,
}

#[derive(Subcommand)]
enum Command {
    /// Run one ingestion job and print its outcome.
    Process {
        #[arg(long)]
        document_id: String,
    },
    /// Read document ids from stdin, one per line, and process them.
    Work,
    /// Partition and chunk a local file without touching any store.
    Inspect {
        #[arg(long)]
        file: PathBuf,
        /// Include the chunk texts in the report.
        #[arg(long, default_value_t = false)]
        chunks: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = WorkerConfig::from_env()?;
    if let Some(bucket) = cli.bucket {
        config.bucket = bucket;
    }
    if let Some(blob_dir) = cli.blob_dir {
        config.blob_dir = Some(blob_dir);
    }
    if let Some(concurrency) = cli.concurrency {
        config.worker.concurrency = concurrency;
    }
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        started_at = %Utc::now().to_rfc3339(),
        "doc-ingest-worker boot"
    );

    if let Command::Inspect { file, chunks } = &cli.command {
        return inspect(&config, file.clone(), *chunks).await;
    }

    match (&config.blob_endpoint, &config.blob_dir) {
        (Some(endpoint), _) => {
            let blobs = HttpBlobStore::new(endpoint.clone(), config.blob_token.clone())?;
            run(&config, cli.command, blobs).await
        }
        (None, Some(dir)) => run(&config, cli.command, FsBlobStore::new(dir.clone())).await,
        (None, None) => anyhow::bail!("set AWS_ENDPOINT_URL_S3 or BLOB_DIR to read document blobs"),
    }
}

async fn run<B>(config: &WorkerConfig, command: Command, blobs: B) -> anyhow::Result<()>
where
    B: BlobStore + 'static,
{
    let (Some(url), Some(key)) = (&config.supabase_url, &config.supabase_service_key) else {
        anyhow::bail!("SUPABASE_API_URL and SUPABASE_SERVICE_KEY are required");
    };
    let store = PostgrestDocumentStore::new(url.clone(), key.clone())?;

    let mut acquirer = SourceAcquirer::new(blobs, config.bucket.clone(), config.fetch.clone())?;
    if let Some(dir) = &config.temp_dir {
        acquirer = acquirer.with_temp_dir(dir.clone());
    }
    let pipeline = IngestionPipeline::new(
        StatusTracker::new(store),
        acquirer,
        PartitionerRegistry::with_defaults()?,
        TitleChunker::new(config.chunking)?,
    )
    .with_partition_limits(config.partition.clone());

    match command {
        Command::Process { document_id } => {
            let outcome = match pipeline.process_document(&document_id, &CancelFlag::default()).await {
                Ok(outcome) => outcome,
                Err(error) => JobOutcome::failure(&document_id, &error),
            };
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.is_success() {
                anyhow::bail!("document {document_id} failed");
            }
        }
        Command::Work => {
            let worker = JobWorker::new(Arc::new(pipeline), config.worker.clone())?;
            let (sender, receiver) = mpsc::channel(config.worker.concurrency * 4);

            let feeder = tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let document_id = line.trim();
                            if document_id.is_empty() {
                                continue;
                            }
                            if sender.send(document_id.to_string()).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            warn!(error = %error, "stopped reading document ids");
                            break;
                        }
                    }
                }
            });

            let summary = worker.run(receiver).await;
            feeder.await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Inspect { .. } => anyhow::bail!("inspect runs without a document store"),
    }

    Ok(())
}

async fn inspect(config: &WorkerConfig, file: PathBuf, show_chunks: bool) -> anyhow::Result<()> {
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let format = DocumentFormat::from_filename(&filename)?;
    let partitioner = PartitionerRegistry::with_defaults()?.get(format)?;

    let path = file.clone();
    let elements = tokio::task::spawn_blocking(move || partitioner.partition(&path)).await??;
    let census = analyze(&elements);
    let (chunks, metrics) = TitleChunker::new(config.chunking)?.chunk(&elements);

    let mut report = json!({
        "file": file.display().to_string(),
        "format": format,
        "elements_found": census,
        "total_elements": elements.len(),
        "chunking": metrics,
    });
    if show_chunks {
        report["chunks"] = serde_json::to_value(&chunks)?;
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
