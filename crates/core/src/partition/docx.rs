use super::{normalize_whitespace, rows_to_html, rows_to_text, DocumentFormat, Partitioner};
use crate::models::{Element, ElementCategory};
use crate::PipelineError;
use docx_rs::{
    DocumentChild, Paragraph, ParagraphChild, RunChild, Table, TableCellContent, TableChild,
    TableRowChild,
};
use std::path::Path;

#[derive(Debug, Default, Clone, Copy)]
pub struct DocxPartitioner;

impl DocxPartitioner {
    pub fn partition_bytes(&self, data: &[u8]) -> Result<Vec<Element>, PipelineError> {
        let docx = docx_rs::read_docx(data)
            .map_err(|error| PipelineError::Partition(format!("unreadable docx: {error}")))?;

        let mut elements = Vec::new();
        for child in &docx.document.children {
            match child {
                DocumentChild::Paragraph(paragraph) => {
                    if let Some(element) = paragraph_element(paragraph) {
                        elements.push(element);
                    }
                }
                DocumentChild::Table(table) => {
                    if let Some(element) = table_element(table) {
                        elements.push(element);
                    }
                }
                _ => {}
            }
        }
        Ok(elements)
    }
}

impl Partitioner for DocxPartitioner {
    fn formats(&self) -> &[DocumentFormat] {
        &[DocumentFormat::Docx]
    }

    fn partition(&self, path: &Path) -> Result<Vec<Element>, PipelineError> {
        let data = std::fs::read(path)?;
        self.partition_bytes(&data)
    }
}

fn paragraph_element(paragraph: &Paragraph) -> Option<Element> {
    let text = normalize_whitespace(&paragraph_text(paragraph));
    if text.is_empty() {
        return None;
    }

    let style = paragraph
        .property
        .style
        .as_ref()
        .map(|style| style.val.as_str())
        .unwrap_or_default();

    let (category, level) = match style_category(style) {
        Some(styled) => styled,
        None if paragraph.has_numbering => (ElementCategory::ListItem, None),
        None => (ElementCategory::NarrativeText, None),
    };

    let mut element = Element::new(category, text);
    element.metadata.heading_level = level;
    Some(element)
}

fn style_category(style: &str) -> Option<(ElementCategory, Option<u8>)> {
    let lowered = style.to_ascii_lowercase().replace(' ', "");
    if lowered == "title" {
        return Some((ElementCategory::Title, Some(0)));
    }
    if lowered == "subtitle" {
        return Some((ElementCategory::Header, Some(1)));
    }
    if lowered == "caption" {
        return Some((ElementCategory::FigureCaption, None));
    }
    if lowered.starts_with("listparagraph") || lowered.starts_with("listbullet") || lowered.starts_with("listnumber") {
        return Some((ElementCategory::ListItem, None));
    }
    lowered
        .strip_prefix("heading")
        .and_then(|level| level.parse::<u8>().ok())
        .map(|level| (ElementCategory::Header, Some(level)))
}

fn paragraph_text(paragraph: &Paragraph) -> String {
    let mut text = String::new();
    collect_text(&paragraph.children, &mut text);
    text
}

fn collect_text(children: &[ParagraphChild], out: &mut String) {
    for child in children {
        match child {
            ParagraphChild::Run(run) => {
                for run_child in &run.children {
                    match run_child {
                        RunChild::Text(text) => out.push_str(&text.text),
                        RunChild::Tab(_) | RunChild::Break(_) => out.push(' '),
                        _ => {}
                    }
                }
            }
            ParagraphChild::Hyperlink(link) => collect_text(&link.children, out),
            _ => {}
        }
    }
}

fn table_element(table: &Table) -> Option<Element> {
    let mut rows = Vec::new();
    for TableChild::TableRow(row) in &table.rows {
        let cells = row
            .cells
            .iter()
            .map(|TableRowChild::TableCell(cell)| {
                let text = cell
                    .children
                    .iter()
                    .filter_map(|content| match content {
                        TableCellContent::Paragraph(paragraph) => Some(paragraph_text(paragraph)),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                normalize_whitespace(&text)
            })
            .collect::<Vec<_>>();
        if cells.iter().any(|cell| !cell.is_empty()) {
            rows.push(cells);
        }
    }

    if rows.is_empty() {
        return None;
    }

    let mut element = Element::new(ElementCategory::Table, rows_to_text(&rows));
    element.metadata.text_as_html = Some(rows_to_html(&rows));
    Some(element)
}
