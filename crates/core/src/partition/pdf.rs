use super::{normalize_whitespace, rows_to_html, rows_to_text, DocumentFormat, Partitioner};
use crate::models::{Element, ElementCategory};
use crate::PipelineError;
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::{Document, Object, ObjectId};
use regex::Regex;
use std::path::Path;
use std::time::Instant;

const MAX_TITLE_CHARS: usize = 80;

/// Line-level layout heuristics over `lopdf` text extraction, plus inline
/// payloads for every image XObject on a page.
pub struct PdfPartitioner {
    list_item: Regex,
    numbered_heading: Regex,
    caption: Regex,
    column_gap: Regex,
}

impl PdfPartitioner {
    pub fn new() -> Result<Self, PipelineError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|error| PipelineError::Internal(format!("regex {pattern}: {error}")))
        };

        Ok(Self {
            list_item: compile(r"^(?:[•◦▪\-\*–·]|\(?\d{1,2}[.)]|\(?[a-z][.)])\s+\S")?,
            numbered_heading: compile(r"^\d+(?:\.\d+)+\.?\s+\p{Lu}")?,
            caption: compile(r"^(?:Figure|Fig\.|Table|Chart)\s+\d+")?,
            column_gap: compile(r"\t+| {2,}")?,
        })
    }

    /// Splits one page of extracted text into typed elements.
    pub fn classify_page(&self, page: u32, text: &str) -> Vec<Element> {
        let mut layout = PageLayout::new(page);

        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                layout.flush_all();
                continue;
            }

            let cells = self.table_cells(raw_line);
            if cells.len() >= 2 {
                layout.flush_paragraph();
                layout.table_rows.push(cells);
                continue;
            }
            layout.flush_table();

            let normalized = normalize_whitespace(line);
            if self.list_item.is_match(&normalized) {
                layout.flush_paragraph();
                layout.push(ElementCategory::ListItem, normalized);
            } else if self.caption.is_match(&normalized) {
                layout.flush_paragraph();
                layout.push(ElementCategory::FigureCaption, normalized);
            } else if self.is_title(&normalized) && layout.at_paragraph_boundary() {
                layout.flush_paragraph();
                layout.push(ElementCategory::Title, normalized);
            } else {
                layout.paragraph.push(normalized);
            }
        }

        layout.flush_all();
        layout.elements
    }

    fn table_cells(&self, raw_line: &str) -> Vec<String> {
        let trimmed = raw_line.trim();
        if !self.column_gap.is_match(trimmed) {
            return Vec::new();
        }
        self.column_gap
            .split(trimmed)
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .map(str::to_string)
            .collect()
    }

    fn is_title(&self, line: &str) -> bool {
        if line.chars().count() > MAX_TITLE_CHARS || line.ends_with(['.', ',', ';', ':', '!', '?']) {
            return false;
        }
        if self.numbered_heading.is_match(line) {
            return true;
        }

        let letters = line.chars().filter(|c| c.is_alphabetic()).collect::<Vec<_>>();
        if letters.len() < 2 {
            return false;
        }
        if letters.iter().all(|c| c.is_uppercase()) {
            return true;
        }

        let words = line
            .split_whitespace()
            .filter(|word| word.chars().next().is_some_and(char::is_alphabetic))
            .collect::<Vec<_>>();
        let capitalized = words
            .iter()
            .filter(|word| word.chars().next().is_some_and(char::is_uppercase))
            .count();
        words.len() <= 10 && capitalized * 3 >= words.len() * 2
    }
}

impl Partitioner for PdfPartitioner {
    fn formats(&self) -> &[DocumentFormat] {
        &[DocumentFormat::Pdf]
    }

    fn partition(&self, path: &Path) -> Result<Vec<Element>, PipelineError> {
        self.partition_pages(path, None)
    }

    fn partition_before(&self, path: &Path, deadline: Instant) -> Result<Vec<Element>, PipelineError> {
        self.partition_pages(path, Some(deadline))
    }
}

impl PdfPartitioner {
    fn partition_pages(&self, path: &Path, deadline: Option<Instant>) -> Result<Vec<Element>, PipelineError> {
        let document = Document::load(path).map_err(|error| {
            PipelineError::Partition(format!("unreadable pdf {}: {error}", path.display()))
        })?;

        let pages = document.get_pages();
        if pages.is_empty() {
            return Err(PipelineError::Partition(format!("pdf has no pages: {}", path.display())));
        }

        let mut elements = Vec::new();
        for (page_no, page_id) in pages {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(PipelineError::Partition(format!(
                    "partitioning {} timed out at page {page_no}",
                    path.display()
                )));
            }
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| PipelineError::Partition(format!("page {page_no}: {error}")))?;
            elements.extend(self.classify_page(page_no, &text));
            elements.extend(page_images(&document, page_no, page_id));
        }

        Ok(elements)
    }
}

struct PageLayout {
    page: u32,
    elements: Vec<Element>,
    paragraph: Vec<String>,
    table_rows: Vec<Vec<String>>,
}

impl PageLayout {
    fn new(page: u32) -> Self {
        Self {
            page,
            elements: Vec::new(),
            paragraph: Vec::new(),
            table_rows: Vec::new(),
        }
    }

    fn push(&mut self, category: ElementCategory, text: String) {
        self.elements.push(Element::new(category, text).on_page(self.page));
    }

    /// A heading can only start where the previous line closed a sentence.
    fn at_paragraph_boundary(&self) -> bool {
        self.paragraph
            .last()
            .map_or(true, |line| line.ends_with(['.', '!', '?', ':']))
    }

    fn flush_paragraph(&mut self) {
        if self.paragraph.is_empty() {
            return;
        }
        let text = self.paragraph.join(" ");
        self.paragraph.clear();
        self.push(ElementCategory::NarrativeText, text);
    }

    /// A lone column-aligned line is not a table; it is kept as text.
    fn flush_table(&mut self) {
        match self.table_rows.len() {
            0 => {}
            1 => {
                let row = self.table_rows.remove(0);
                self.paragraph.push(row.join(" "));
            }
            _ => {
                let rows = std::mem::take(&mut self.table_rows);
                let mut element = Element::new(ElementCategory::Table, rows_to_text(&rows)).on_page(self.page);
                element.metadata.text_as_html = Some(rows_to_html(&rows));
                self.elements.push(element);
            }
        }
    }

    fn flush_all(&mut self) {
        self.flush_table();
        self.flush_paragraph();
    }
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => document.get_object(*id).ok(),
        other => Some(other),
    }
}

fn page_images(document: &Document, page_no: u32, page_id: ObjectId) -> Vec<Element> {
    let xobjects = document
        .get_object(page_id)
        .and_then(Object::as_dict)
        .ok()
        .and_then(|page| page.get(b"Resources").ok())
        .and_then(|resources| resolve(document, resources))
        .and_then(|resources| resources.as_dict().ok())
        .and_then(|resources| resources.get(b"XObject").ok())
        .and_then(|xobjects| resolve(document, xobjects))
        .and_then(|xobjects| xobjects.as_dict().ok());

    let Some(xobjects) = xobjects else {
        return Vec::new();
    };

    let mut images = Vec::new();
    for (name, object) in xobjects.iter() {
        let Some(stream) = resolve(document, object).and_then(|object| object.as_stream().ok()) else {
            continue;
        };
        let is_image = stream
            .dict
            .get(b"Subtype")
            .and_then(Object::as_name)
            .is_ok_and(|subtype| subtype == b"Image");
        if !is_image || stream.content.is_empty() {
            continue;
        }

        let label = String::from_utf8_lossy(name).to_string();
        let mut element = Element::new(ElementCategory::Image, label).on_page(page_no);
        element.metadata.image_base64 = Some(STANDARD.encode(&stream.content));
        element.metadata.image_mime_type = Some(image_mime_type(stream.dict.get(b"Filter").ok()).to_string());
        images.push(element);
    }
    images
}

fn image_mime_type(filter: Option<&Object>) -> &'static str {
    let last_filter = match filter {
        Some(Object::Name(name)) => Some(name.as_slice()),
        Some(Object::Array(filters)) => filters.last().and_then(|f| f.as_name().ok()),
        _ => None,
    };

    match last_filter {
        Some(b"DCTDecode") => "image/jpeg",
        Some(b"JPXDecode") => "image/jp2",
        Some(b"CCITTFaxDecode") => "image/tiff",
        _ => "application/octet-stream",
    }
}
