use crate::models::{Element, ElementCategory, ElementCensus};

/// Counts elements per reporting bucket.
pub fn analyze(elements: &[Element]) -> ElementCensus {
    let mut census = ElementCensus::default();

    for element in elements {
        match element.category {
            ElementCategory::NarrativeText
            | ElementCategory::Text
            | ElementCategory::ListItem
            | ElementCategory::FigureCaption => census.text += 1,
            ElementCategory::Table => census.tables += 1,
            ElementCategory::Image => census.images += 1,
            ElementCategory::Title | ElementCategory::Header => census.titles += 1,
            ElementCategory::Other => census.other += 1,
        }
    }

    census
}
