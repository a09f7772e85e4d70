use crate::error::PipelineError;
use crate::models::{Chunk, ChunkingMetrics, Element};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Joins element texts inside a chunk; counts toward the chunk length.
pub const ELEMENT_SEPARATOR: &str = "\n\n";
const SEPARATOR_CHARS: usize = ELEMENT_SEPARATOR.len();

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    /// Hard ceiling; no chunk is ever longer.
    pub max_chars: usize,
    /// Past this length the open chunk closes at the next element boundary.
    pub soft_break_chars: usize,
    /// Chunks shorter than this are folded into a neighbour when they fit.
    pub merge_below_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 3_000,
            soft_break_chars: 2_400,
            merge_below_chars: 500,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_chars == 0 {
            return Err(PipelineError::InvalidConfig("max_chars must be positive".to_string()));
        }
        if self.soft_break_chars > self.max_chars {
            return Err(PipelineError::InvalidConfig(format!(
                "soft_break_chars {} exceeds max_chars {}",
                self.soft_break_chars, self.max_chars
            )));
        }
        if self.merge_below_chars >= self.soft_break_chars {
            return Err(PipelineError::InvalidConfig(format!(
                "merge_below_chars {} must be below soft_break_chars {}",
                self.merge_below_chars, self.soft_break_chars
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TitleChunker {
    config: ChunkingConfig,
}

impl TitleChunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn chunk(&self, elements: &[Element]) -> (Vec<Chunk>, ChunkingMetrics) {
        let drafts = draft_sections(elements, &self.config);
        let merged = merge_small(drafts, &self.config);

        let chunks = merged
            .into_iter()
            .enumerate()
            .map(|(index, draft)| draft.into_chunk(index))
            .collect::<Vec<_>>();
        let metrics = metrics(&chunks, elements.len());
        (chunks, metrics)
    }
}

impl Default for TitleChunker {
    fn default() -> Self {
        Self {
            config: ChunkingConfig::default(),
        }
    }
}

/// Groups `elements` into title-delimited, size-bounded chunks.
pub fn chunk_by_title(
    elements: &[Element],
    config: &ChunkingConfig,
) -> Result<(Vec<Chunk>, ChunkingMetrics), PipelineError> {
    Ok(TitleChunker::new(*config)?.chunk(elements))
}

#[derive(Debug, Default)]
struct Draft {
    elements: Vec<Element>,
    len: usize,
}

impl Draft {
    fn single(element: Element) -> Self {
        let mut draft = Self::default();
        draft.push(element);
        draft
    }

    fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    fn len_with(&self, extra: usize) -> usize {
        if self.is_empty() {
            extra
        } else {
            self.len + SEPARATOR_CHARS + extra
        }
    }

    fn push(&mut self, element: Element) {
        self.len = self.len_with(element.char_len());
        self.elements.push(element);
    }

    fn absorb(&mut self, other: Draft) {
        for element in other.elements {
            self.push(element);
        }
    }

    fn into_chunk(self, index: usize) -> Chunk {
        let text = self
            .elements
            .iter()
            .map(|element| element.text.as_str())
            .collect::<Vec<_>>()
            .join(ELEMENT_SEPARATOR);

        Chunk {
            chunk_id: make_chunk_id(index, &text),
            index,
            char_count: self.len,
            text,
            elements: self.elements,
        }
    }
}

fn draft_sections(elements: &[Element], config: &ChunkingConfig) -> Vec<Draft> {
    let mut drafts = Vec::new();
    let mut open = Draft::default();

    for element in elements {
        if element.text.trim().is_empty() {
            continue;
        }

        let len = element.char_len();
        if len > config.max_chars {
            close(&mut drafts, &mut open);
            drafts.extend(split_oversized(element, config.max_chars).into_iter().map(Draft::single));
            continue;
        }

        let starts_new = !open.is_empty()
            && (element.category.is_title()
                || open.len > config.soft_break_chars
                || open.len_with(len) > config.max_chars);
        if starts_new {
            close(&mut drafts, &mut open);
        }
        open.push(element.clone());
    }

    close(&mut drafts, &mut open);
    drafts
}

fn close(drafts: &mut Vec<Draft>, open: &mut Draft) {
    if !open.is_empty() {
        drafts.push(std::mem::take(open));
    }
}

fn merge_small(drafts: Vec<Draft>, config: &ChunkingConfig) -> Vec<Draft> {
    let mut merged: Vec<Draft> = Vec::with_capacity(drafts.len());

    for draft in drafts {
        if let Some(previous) = merged.last_mut() {
            let small = draft.len < config.merge_below_chars || previous.len < config.merge_below_chars;
            if small && previous.len_with(draft.len) <= config.max_chars {
                previous.absorb(draft);
                continue;
            }
        }
        merged.push(draft);
    }

    merged
}

/// Cuts one element into pieces of at most `max_chars`, preferring the last
/// whitespace inside each window.
pub fn split_oversized(element: &Element, max_chars: usize) -> Vec<Element> {
    let chars: Vec<char> = element.text.trim().chars().collect();
    let max_chars = max_chars.max(1);
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let hard_end = (start + max_chars).min(chars.len());
        let end = if hard_end == chars.len() {
            hard_end
        } else {
            chars[start + 1..=hard_end]
                .iter()
                .rposition(|c| c.is_whitespace())
                .map(|offset| start + 1 + offset)
                .unwrap_or(hard_end)
        };

        let text: String = chars[start..end].iter().collect();
        let text = text.trim_end().to_string();
        if !text.is_empty() {
            let mut piece = element.clone();
            piece.text = text;
            piece.metadata.is_continuation = !pieces.is_empty();
            pieces.push(piece);
        }

        start = end;
        while start < chars.len() && chars[start].is_whitespace() {
            start += 1;
        }
    }

    pieces
}

fn make_chunk_id(index: usize, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn metrics(chunks: &[Chunk], total_elements: usize) -> ChunkingMetrics {
    let chunk_sizes = chunks.iter().map(|chunk| chunk.char_count).collect::<Vec<_>>();
    let total: usize = chunk_sizes.iter().sum();

    ChunkingMetrics {
        total_chunks: chunks.len(),
        total_elements,
        min_chars: chunk_sizes.iter().copied().min().unwrap_or(0),
        max_chars: chunk_sizes.iter().copied().max().unwrap_or(0),
        mean_chars: if chunks.is_empty() {
            0.0
        } else {
            total as f64 / chunks.len() as f64
        },
        chunk_sizes,
    }
}
