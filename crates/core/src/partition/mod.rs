pub mod docx;
pub mod html;
pub mod pdf;

pub use docx::DocxPartitioner;
pub use html::HtmlPartitioner;
pub use pdf::PdfPartitioner;

use crate::acquire::ContentHandle;
use crate::models::Element;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Html,
    /// A crawled page; partitioned like HTML.
    Url,
}

impl DocumentFormat {
    /// Format from the lower-cased extension of `filename`.
    pub fn from_filename(filename: &str) -> Result<Self, PipelineError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .ok_or_else(|| {
                PipelineError::UnsupportedFormat(format!("{filename} has no file extension"))
            })?;

        match extension.as_str() {
            "pdf" => Ok(Self::Pdf),
            "docx" => Ok(Self::Docx),
            "html" | "htm" => Ok(Self::Html),
            other => Err(PipelineError::UnsupportedFormat(format!(
                "no partitioner for .{other} files"
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Html | Self::Url => "html",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Html => "html",
            Self::Url => "url",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Partitioner: Send + Sync {
    fn formats(&self) -> &[DocumentFormat];

    fn partition(&self, path: &Path) -> Result<Vec<Element>, PipelineError>;

    /// Like `partition`, but stops with a `Partition` error once `deadline`
    /// has passed. Multi-page formats check it between pages; the default
    /// only checks before starting.
    fn partition_before(&self, path: &Path, deadline: Instant) -> Result<Vec<Element>, PipelineError> {
        if Instant::now() >= deadline {
            return Err(PipelineError::Partition(format!("deadline passed before {}", path.display())));
        }
        self.partition(path)
    }
}

#[derive(Clone, Default)]
pub struct PartitionerRegistry {
    partitioners: HashMap<DocumentFormat, Arc<dyn Partitioner>>,
}

impl PartitionerRegistry {
    /// PDF, DOCX and HTML (which also serves crawled URLs).
    pub fn with_defaults() -> Result<Self, PipelineError> {
        let mut registry = Self::default();
        registry.register(Arc::new(PdfPartitioner::new()?));
        registry.register(Arc::new(DocxPartitioner));
        registry.register(Arc::new(HtmlPartitioner));
        Ok(registry)
    }

    /// Later registrations replace earlier ones for the same format.
    pub fn register(&mut self, partitioner: Arc<dyn Partitioner>) {
        for format in partitioner.formats() {
            self.partitioners.insert(*format, Arc::clone(&partitioner));
        }
    }

    pub fn get(&self, format: DocumentFormat) -> Result<Arc<dyn Partitioner>, PipelineError> {
        self.partitioners.get(&format).cloned().ok_or_else(|| {
            PipelineError::UnsupportedFormat(format!("no partitioner registered for {format}"))
        })
    }
}

#[derive(Debug, Clone)]
pub struct PartitionLimits {
    pub timeout: Duration,
    pub max_input_bytes: u64,
}

impl Default for PartitionLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            max_input_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Runs the partitioner for `handle.format` on the blocking pool under a
/// deadline. Empty output counts as a partition failure.
pub async fn partition_with_limits(
    registry: &PartitionerRegistry,
    handle: &ContentHandle,
    limits: &PartitionLimits,
) -> Result<Vec<Element>, PipelineError> {
    if handle.byte_len > limits.max_input_bytes {
        return Err(PipelineError::Partition(format!(
            "{} is {} bytes, above the {} byte limit",
            handle.source, handle.byte_len, limits.max_input_bytes
        )));
    }

    let partitioner = registry.get(handle.format)?;
    let path = handle.path().to_path_buf();
    let deadline = Instant::now() + limits.timeout;
    let task = tokio::task::spawn_blocking(move || partitioner.partition_before(&path, deadline));

    let elements = match tokio::time::timeout(limits.timeout, task).await {
        Ok(joined) => joined??,
        Err(_) => {
            return Err(PipelineError::Partition(format!(
                "partitioning {} timed out after {:?}",
                handle.source, limits.timeout
            )));
        }
    };

    if elements.is_empty() {
        return Err(PipelineError::Partition(format!(
            "no content could be extracted from {}",
            handle.source
        )));
    }

    debug!(source = %handle.source, format = %handle.format, elements = elements.len(), "partitioned");
    Ok(elements)
}

pub(crate) fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

pub(crate) fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Renders rows of cell text as a plain `<table>`.
pub(crate) fn rows_to_html(rows: &[Vec<String>]) -> String {
    let mut html = String::from("<table>");
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            html.push_str("<td>");
            html.push_str(&escape_html(cell));
            html.push_str("</td>");
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}

pub(crate) fn rows_to_text(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|row| row.join(" | "))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementCategory;

    struct Fixed(Vec<Element>);

    impl Partitioner for Fixed {
        fn formats(&self) -> &[DocumentFormat] {
            &[DocumentFormat::Pdf]
        }

        fn partition(&self, _path: &Path) -> Result<Vec<Element>, PipelineError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn format_comes_from_lowercased_extension() {
        assert_eq!(DocumentFormat::from_filename("Q3.Report.PDF").ok(), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_filename("notes.docx").ok(), Some(DocumentFormat::Docx));
        assert_eq!(DocumentFormat::from_filename("index.htm").ok(), Some(DocumentFormat::Html));
        assert!(matches!(
            DocumentFormat::from_filename("README"),
            Err(PipelineError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            DocumentFormat::from_filename("sheet.xlsx"),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn default_registry_serves_urls_with_html() {
        let registry = PartitionerRegistry::with_defaults().expect("registry builds");
        for format in [
            DocumentFormat::Pdf,
            DocumentFormat::Docx,
            DocumentFormat::Html,
            DocumentFormat::Url,
        ] {
            assert!(registry.get(format).is_ok(), "{format} should be registered");
        }
        assert_eq!(registry.get(DocumentFormat::Url).map(|p| p.formats().len()).ok(), Some(2));
    }

    #[test]
    fn later_registration_overrides_format() {
        let mut registry = PartitionerRegistry::with_defaults().expect("registry builds");
        registry.register(Arc::new(Fixed(vec![Element::new(ElementCategory::Text, "stub")])));

        let partitioner = registry.get(DocumentFormat::Pdf).expect("pdf registered");
        let elements = partitioner.partition(Path::new("unused.pdf")).expect("stub partitions");
        assert_eq!(elements.len(), 1);
    }

    #[test]
    fn passed_deadline_refuses_to_start() {
        let partitioner = Fixed(vec![Element::new(ElementCategory::Text, "stub")]);

        let late = partitioner.partition_before(Path::new("unused.pdf"), Instant::now());
        let early = partitioner.partition_before(Path::new("unused.pdf"), Instant::now() + Duration::from_secs(60));

        assert!(matches!(late, Err(PipelineError::Partition(_))));
        assert_eq!(early.map(|elements| elements.len()).ok(), Some(1));
    }

    #[test]
    fn empty_registry_reports_unsupported_format() {
        let registry = PartitionerRegistry::default();
        assert!(matches!(
            registry.get(DocumentFormat::Docx),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    struct Slow;

    impl Partitioner for Slow {
        fn formats(&self) -> &[DocumentFormat] {
            &[DocumentFormat::Html]
        }

        fn partition(&self, _path: &Path) -> Result<Vec<Element>, PipelineError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(vec![Element::new(ElementCategory::Text, "late")])
        }
    }

    fn handle(format: DocumentFormat, body: &[u8]) -> ContentHandle {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(body).expect("write fixture");
        ContentHandle::new(file, format, "fixture").expect("handle")
    }

    #[tokio::test]
    async fn slow_partitioner_times_out_as_partition_error() {
        let mut registry = PartitionerRegistry::default();
        registry.register(Arc::new(Slow));
        let limits = PartitionLimits {
            timeout: Duration::from_millis(50),
            ..PartitionLimits::default()
        };

        let result = partition_with_limits(&registry, &handle(DocumentFormat::Html, b"<p/>"), &limits).await;
        assert!(matches!(result, Err(PipelineError::Partition(message)) if message.contains("timed out")));
    }

    #[tokio::test]
    async fn oversized_input_is_refused() {
        let limits = PartitionLimits {
            max_input_bytes: 4,
            ..PartitionLimits::default()
        };
        let registry = PartitionerRegistry::with_defaults().expect("registry builds");

        let result =
            partition_with_limits(&registry, &handle(DocumentFormat::Html, b"<p>too long</p>"), &limits).await;
        assert!(matches!(result, Err(PipelineError::Partition(_))));
    }

    #[tokio::test]
    async fn empty_output_is_a_partition_error() {
        let registry = PartitionerRegistry::with_defaults().expect("registry builds");
        let result = partition_with_limits(
            &registry,
            &handle(DocumentFormat::Html, b"<html><body></body></html>"),
            &PartitionLimits::default(),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::Partition(_))));
    }

    #[test]
    fn table_rows_render_as_html() {
        let rows = vec![
            vec!["Part".to_string(), "Qty".to_string()],
            vec!["Bolt <M8>".to_string(), "4".to_string()],
        ];
        assert_eq!(
            rows_to_html(&rows),
            "<table><tr><td>Part</td><td>Qty</td></tr><tr><td>Bolt &lt;M8&gt;</td><td>4</td></tr></table>"
        );
        assert_eq!(rows_to_text(&rows), "Part | Qty\nBolt <M8> | 4");
    }
}
