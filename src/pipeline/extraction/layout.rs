//! Geometric layout reconstruction: rebuild reading-order lines from word boxes.
//!
//! Engines disagree on page shape (flat words, native lines, nested
//! block/paragraph/line trees). Everything here works on the flattened
//! word list, so the rest of the pipeline never sees engine schemas.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::trace;

use super::types::{Line, Page, Word, WordSource};
use crate::config::GeometryConfig;

/// Collect every word at any depth, dropping exact duplicates
/// (same text and box) that engines emit at more than one level.
pub fn flatten_words<S: WordSource + ?Sized>(source: &S) -> Vec<Word> {
    let mut seen: HashSet<(String, [u32; 4])> = HashSet::new();
    source
        .all_words()
        .into_iter()
        .filter(|w| {
            let key = (
                w.text.clone(),
                [
                    w.bbox.x0.to_bits(),
                    w.bbox.y0.to_bits(),
                    w.bbox.x1.to_bits(),
                    w.bbox.y1.to_bits(),
                ],
            );
            seen.insert(key)
        })
        .cloned()
        .collect()
}

/// Reading order: vertical-center band, then left edge. The remaining
/// keys make the order total so the result never depends on input order.
fn reading_order(a: &Word, b: &Word, band: f32) -> Ordering {
    let band_of = |w: &Word| (w.bbox.center_y() / band).round() as i64;
    band_of(a)
        .cmp(&band_of(b))
        .then_with(|| a.bbox.x0.total_cmp(&b.bbox.x0))
        .then_with(|| a.bbox.center_y().total_cmp(&b.bbox.center_y()))
        .then_with(|| a.bbox.x1.total_cmp(&b.bbox.x1))
        .then_with(|| a.text.cmp(&b.text))
}

/// Sort words into reading order and group them into lines.
///
/// A word joins the current line while its vertical center is within
/// `line_tolerance_px` of the previous word's.
pub fn reconstruct_lines(mut words: Vec<Word>, geometry: &GeometryConfig) -> Vec<Line> {
    let band = geometry.sort_band_px.max(1.0);
    words.sort_by(|a, b| reading_order(a, b, band));

    let mut lines = Vec::new();
    let mut current: Vec<Word> = Vec::new();

    for word in words {
        let joins = current
            .last()
            .map(|prev| (word.bbox.center_y() - prev.bbox.center_y()).abs() < geometry.line_tolerance_px)
            .unwrap_or(true);

        if !joins {
            lines.extend(Line::from_words(std::mem::take(&mut current)));
        }
        current.push(word);
    }
    lines.extend(Line::from_words(current));

    trace!(lines = lines.len(), "Reconstructed lines");
    lines
}

/// Native top-level lines when the engine produced them, otherwise
/// lines rebuilt from every word in the page tree.
pub fn lines_from_page(page: &Page, geometry: &GeometryConfig) -> Vec<Line> {
    let native: Vec<Line> = page
        .lines
        .iter()
        .filter(|l| !l.words.is_empty())
        .cloned()
        .collect();
    if !native.is_empty() {
        return native;
    }
    reconstruct_lines(flatten_words(page), geometry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::types::{Block, BoundingBox, Paragraph};

    fn word(text: &str, x0: f32, cy: f32) -> Word {
        Word::new(text, BoundingBox::new(x0, cy - 8.0, x0 + 60.0, cy + 8.0), 0.9)
    }

    fn texts(lines: &[Line]) -> Vec<String> {
        lines.iter().map(|l| l.text.clone()).collect()
    }

    fn sample_words() -> Vec<Word> {
        vec![
            word("MAÑANA", 80.0, 50.0),
            word("TARDE", 280.0, 53.0),
            word("NOCHE", 480.0, 48.0),
            word("G.C.", 70.0, 100.0),
            word("LOPEZ,", 140.0, 102.0),
            word("CABO", 270.0, 99.0),
            word("RUIZ,", 340.0, 101.0),
            word("SALIENTES", 60.0, 160.0),
        ]
    }

    #[test]
    fn groups_rows_by_vertical_center() {
        let lines = reconstruct_lines(sample_words(), &GeometryConfig::default());
        assert_eq!(
            texts(&lines),
            vec!["MAÑANA TARDE NOCHE", "G.C. LOPEZ, CABO RUIZ,", "SALIENTES"]
        );
    }

    #[test]
    fn line_box_is_union_of_words() {
        let lines = reconstruct_lines(sample_words(), &GeometryConfig::default());
        assert_eq!(lines[0].bbox.x0, 80.0);
        assert_eq!(lines[0].bbox.x1, 540.0);
        assert_eq!(lines[0].bbox.y0, 40.0);
        assert_eq!(lines[0].bbox.y1, 61.0);
    }

    #[test]
    fn reconstruction_is_input_order_invariant() {
        let geometry = GeometryConfig::default();
        let expected = reconstruct_lines(sample_words(), &geometry);

        let mut reversed = sample_words();
        reversed.reverse();
        assert_eq!(reconstruct_lines(reversed, &geometry), expected);

        // deterministic interleaving
        let words = sample_words();
        let n = words.len();
        let shuffled: Vec<Word> = (0..n).map(|i| words[(i * 3 + 1) % n].clone()).collect();
        assert_eq!(reconstruct_lines(shuffled, &geometry), expected);
    }

    #[test]
    fn tolerance_is_strict() {
        let geometry = GeometryConfig::default();
        let lines = reconstruct_lines(vec![word("A", 0.0, 100.0), word("B", 100.0, 115.0)], &geometry);
        assert_eq!(lines.len(), 2, "exactly 15px apart starts a new line");

        let lines = reconstruct_lines(vec![word("A", 0.0, 100.0), word("B", 100.0, 114.0)], &geometry);
        assert_eq!(texts(&lines), vec!["A B"]);
    }

    #[test]
    fn empty_input_gives_no_lines() {
        assert!(reconstruct_lines(Vec::new(), &GeometryConfig::default()).is_empty());
        assert!(lines_from_page(&Page::default(), &GeometryConfig::default()).is_empty());
    }

    #[test]
    fn flatten_dedupes_words_repeated_across_levels() {
        let w = word("LOPEZ,", 140.0, 102.0);
        let page = Page {
            text: String::new(),
            words: vec![w.clone()],
            lines: Vec::new(),
            blocks: vec![Block {
                words: vec![w.clone()],
                paragraphs: vec![Paragraph {
                    words: Vec::new(),
                    lines: vec![Line::from_words(vec![w.clone(), word("G.C.", 70.0, 100.0)]).unwrap()],
                }],
            }],
        };
        let flat = flatten_words(&page);
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn native_lines_take_precedence() {
        let native = Line::from_words(vec![word("NATIVA", 0.0, 10.0)]).unwrap();
        let page = Page {
            text: String::new(),
            words: vec![word("SUELTA", 0.0, 300.0)],
            lines: vec![native.clone()],
            blocks: Vec::new(),
        };
        assert_eq!(lines_from_page(&page, &GeometryConfig::default()), vec![native]);
    }

    #[test]
    fn nested_tree_is_regrouped_across_blocks() {
        // Two cells of the same row reported as separate blocks
        let page = Page {
            text: String::new(),
            words: Vec::new(),
            lines: Vec::new(),
            blocks: vec![
                Block {
                    words: Vec::new(),
                    paragraphs: vec![Paragraph {
                        words: Vec::new(),
                        lines: vec![Line::from_words(vec![word("G.C.", 70.0, 100.0)]).unwrap()],
                    }],
                },
                Block {
                    words: vec![word("CABO", 270.0, 104.0)],
                    paragraphs: Vec::new(),
                },
            ],
        };
        let lines = lines_from_page(&page, &GeometryConfig::default());
        assert_eq!(texts(&lines), vec!["G.C. CABO"]);
    }
}
