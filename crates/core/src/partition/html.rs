use super::{normalize_whitespace, rows_to_text, DocumentFormat, Partitioner};
use crate::models::{Element, ElementCategory};
use crate::PipelineError;
use base64::{engine::general_purpose::STANDARD, Engine};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use std::path::Path;

/// Tags emitted as one element each; their descendants are not visited.
const BLOCKS: [&str; 16] = [
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "pre", "blockquote", "li", "table", "img", "figcaption",
    "dt", "dd", "caption",
];

const SKIPPED: [&str; 8] = ["head", "script", "style", "noscript", "template", "iframe", "svg", "button"];

/// Text inside these continues the surrounding run instead of starting a new one.
const INLINE: [&str; 17] = [
    "a", "abbr", "b", "bdi", "cite", "code", "em", "font", "i", "kbd", "mark", "q", "small", "span",
    "strong", "sub", "sup",
];

#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlPartitioner;

impl HtmlPartitioner {
    /// Walks `body` in document order. Text outside any block tag (divs,
    /// sections, bare body text) becomes `NarrativeText`.
    pub fn partition_html(&self, source: &str) -> Result<Vec<Element>, PipelineError> {
        let document = Html::parse_document(source);
        let body = selector("body")?;
        let mut walker = Walker {
            rows: selector("tr")?,
            cells: selector("th, td")?,
            elements: Vec::new(),
            loose: String::new(),
        };

        match document.select(&body).next() {
            Some(body) => walker.visit(body),
            None => walker.visit(document.root_element()),
        }
        walker.flush_loose();

        Ok(walker.elements)
    }
}

struct Walker {
    rows: Selector,
    cells: Selector,
    elements: Vec<Element>,
    /// Text collected since the last block boundary.
    loose: String,
}

impl Walker {
    fn visit(&mut self, element: ElementRef<'_>) {
        let name = element.value().name();
        if SKIPPED.contains(&name) {
            return;
        }

        if BLOCKS.contains(&name) {
            self.flush_loose();
            let block = match name {
                "h1" => text_element(ElementCategory::Title, &element, Some(1)),
                "h2" | "h3" | "h4" | "h5" | "h6" => {
                    let level = name[1..].parse::<u8>().ok();
                    text_element(ElementCategory::Header, &element, level)
                }
                "li" | "dt" | "dd" => text_element(ElementCategory::ListItem, &element, None),
                "figcaption" | "caption" => text_element(ElementCategory::FigureCaption, &element, None),
                "table" => table_element(&element, &self.rows, &self.cells),
                "img" => Some(image_element(&element)),
                _ => text_element(ElementCategory::NarrativeText, &element, None),
            };
            self.elements.extend(block);
            return;
        }

        let inline = INLINE.contains(&name);
        if !inline {
            self.flush_loose();
        }
        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.loose.push_str(text),
                Node::Element(_) => {
                    if let Some(child) = ElementRef::wrap(child) {
                        self.visit(child);
                    }
                }
                _ => {}
            }
        }
        if !inline {
            self.flush_loose();
        }
    }

    fn flush_loose(&mut self) {
        let text = normalize_whitespace(&self.loose);
        self.loose.clear();
        if !text.is_empty() {
            self.elements.push(Element::new(ElementCategory::NarrativeText, text));
        }
    }
}

impl Partitioner for HtmlPartitioner {
    fn formats(&self) -> &[DocumentFormat] {
        &[DocumentFormat::Html, DocumentFormat::Url]
    }

    fn partition(&self, path: &Path) -> Result<Vec<Element>, PipelineError> {
        let bytes = std::fs::read(path)?;
        self.partition_html(&String::from_utf8_lossy(&bytes))
    }
}

fn selector(css: &str) -> Result<Selector, PipelineError> {
    Selector::parse(css).map_err(|error| PipelineError::Internal(format!("selector {css}: {error}")))
}

fn collapsed_text(element: &ElementRef<'_>) -> String {
    normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

fn text_element(category: ElementCategory, block: &ElementRef<'_>, level: Option<u8>) -> Option<Element> {
    let text = collapsed_text(block);
    if text.is_empty() {
        return None;
    }
    let mut element = Element::new(category, text);
    element.metadata.heading_level = level;
    Some(element)
}

fn table_element(table: &ElementRef<'_>, rows: &Selector, cells: &Selector) -> Option<Element> {
    let grid = table
        .select(rows)
        .map(|row| row.select(cells).map(|cell| collapsed_text(&cell)).collect::<Vec<_>>())
        .filter(|row| row.iter().any(|cell| !cell.is_empty()))
        .collect::<Vec<_>>();

    let text = if grid.is_empty() {
        collapsed_text(table)
    } else {
        rows_to_text(&grid)
    };
    if text.is_empty() {
        return None;
    }

    let mut element = Element::new(ElementCategory::Table, text);
    element.metadata.text_as_html = Some(table.html());
    Some(element)
}

fn image_element(image: &ElementRef<'_>) -> Element {
    let attributes = image.value();
    let alt = attributes.attr("alt").map(normalize_whitespace).unwrap_or_default();
    let mut element = Element::new(ElementCategory::Image, alt);

    if let Some(src) = attributes.attr("src") {
        match decode_data_uri(src) {
            Some((mime, payload)) => {
                element.metadata.image_mime_type = Some(mime);
                element.metadata.image_base64 = Some(payload);
            }
            None => element.metadata.source_url = Some(src.to_string()),
        }
    }
    element
}

/// `data:<mime>;base64,<payload>` with a payload that actually decodes.
fn decode_data_uri(src: &str) -> Option<(String, String)> {
    let rest = src.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let payload = payload.trim();
    STANDARD.decode(payload).ok()?;
    Some((mime.to_string(), payload.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><head><title>Ignored</title><script>var x = 1;</script></head>
        <body>
          <h1>Pump Manual</h1>
          <p>Read   this before
             installing.</p>
          <h2>Parts</h2>
          <ul><li>Impeller <b>assembly</b></li><li>Seal kit</li></ul>
          <table><tr><th>Part</th><th>Qty</th></tr><tr><td>Seal</td><td>2</td></tr></table>
          <figure>
            <img src="data:image/png;base64,iVBORw0KGgo=" alt="diagram">
            <figcaption>Figure 1 Exploded view</figcaption>
          </figure>
          <img src="https://example.com/photo.jpg" alt="">
        </body></html>
    "#;

    #[test]
    fn blocks_come_out_in_reading_order() {
        let elements = HtmlPartitioner.partition_html(PAGE).expect("html partitions");
        let categories = elements.iter().map(|e| e.category).collect::<Vec<_>>();

        assert_eq!(
            categories,
            vec![
                ElementCategory::Title,
                ElementCategory::NarrativeText,
                ElementCategory::Header,
                ElementCategory::ListItem,
                ElementCategory::ListItem,
                ElementCategory::Table,
                ElementCategory::Image,
                ElementCategory::FigureCaption,
                ElementCategory::Image,
            ]
        );
        assert_eq!(elements[1].text, "Read this before installing.");
        assert_eq!(elements[2].metadata.heading_level, Some(2));
        assert_eq!(elements[3].text, "Impeller assembly");
    }

    #[test]
    fn tables_keep_html_structure() {
        let elements = HtmlPartitioner.partition_html(PAGE).expect("html partitions");
        let table = &elements[5];

        assert_eq!(table.text, "Part | Qty\nSeal | 2");
        assert!(table
            .metadata
            .text_as_html
            .as_deref()
            .is_some_and(|html| html.starts_with("<table>") && html.contains("<td>Seal</td>")));
    }

    #[test]
    fn inline_images_carry_payload_and_remote_ones_a_url() {
        let elements = HtmlPartitioner.partition_html(PAGE).expect("html partitions");

        assert_eq!(elements[6].text, "diagram");
        assert_eq!(elements[6].metadata.image_mime_type.as_deref(), Some("image/png"));
        assert_eq!(elements[6].metadata.image_base64.as_deref(), Some("iVBORw0KGgo="));
        assert_eq!(
            elements[8].metadata.source_url.as_deref(),
            Some("https://example.com/photo.jpg")
        );
    }

    #[test]
    fn paragraphs_inside_list_items_are_not_duplicated() {
        let elements = HtmlPartitioner
            .partition_html("<ul><li><p>Nested</p></li></ul>")
            .expect("html partitions");
        assert_eq!(elements.len(), 1);
        assert_eq!(elements[0].category, ElementCategory::ListItem);
    }

    #[test]
    fn div_only_pages_keep_their_text() {
        let page = r#"<body>
            <div class="article">Pumps move fluid through the system.</div>
            <div><span>Check seals</span> <em>monthly</em>.</div>
        </body>"#;

        let elements = HtmlPartitioner.partition_html(page).expect("html partitions");

        assert_eq!(
            elements.iter().map(|e| e.text.as_str()).collect::<Vec<_>>(),
            vec!["Pumps move fluid through the system.", "Check seals monthly."]
        );
        assert!(elements.iter().all(|e| e.category == ElementCategory::NarrativeText));
    }

    #[test]
    fn loose_text_keeps_document_order_and_skips_scripts() {
        let page = r#"<body>Intro line
            <h2>Setup</h2>
            <section>Mount the base<script>var tracking = 1;</script><style>.x{}</style></section>
            <noscript>Enable JavaScript</noscript>
            <p>Tighten bolts.</p>
            trailing note</body>"#;

        let elements = HtmlPartitioner.partition_html(page).expect("html partitions");

        assert_eq!(
            elements.iter().map(|e| (e.category, e.text.as_str())).collect::<Vec<_>>(),
            vec![
                (ElementCategory::NarrativeText, "Intro line"),
                (ElementCategory::Header, "Setup"),
                (ElementCategory::NarrativeText, "Mount the base"),
                (ElementCategory::NarrativeText, "Tighten bolts."),
                (ElementCategory::NarrativeText, "trailing note"),
            ]
        );
    }

    #[test]
    fn malformed_data_uri_falls_back_to_source_url() {
        assert_eq!(decode_data_uri("data:image/png;base64,@@@"), None);
        assert_eq!(decode_data_uri("/img/a.png"), None);
    }
}
