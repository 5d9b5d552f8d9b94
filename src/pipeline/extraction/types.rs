use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════
// OCR primitives
// ═══════════════════════════════════════════════════════════

/// Axis-aligned box in image pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// Build from Tesseract-style `left, top, width, height`.
    pub fn from_ltwh(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self::new(left, top, left + width, top + height)
    }

    pub fn center_x(&self) -> f32 {
        (self.x0 + self.x1) / 2.0
    }

    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) / 2.0
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

/// A recognized token with its geometry. Confidence is 0.0-1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Word {
    pub fn new(text: &str, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            text: text.to_string(),
            bbox,
            confidence,
        }
    }
}

/// A horizontal run of words, native from the engine or reconstructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub text: String,
    pub words: Vec<Word>,
    pub bbox: BoundingBox,
}

impl Line {
    /// Assemble a line: words ordered left to right, box is the union,
    /// text is the space-joined word text. `None` for an empty word list.
    pub fn from_words(mut words: Vec<Word>) -> Option<Self> {
        words.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));
        let first = words.first()?.bbox;
        let bbox = words.iter().fold(first, |acc, w| acc.union(&w.bbox));
        let text = words
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        Some(Self { text, words, bbox })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default)]
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default)]
    pub paragraphs: Vec<Paragraph>,
}

/// One engine's recognition result. Engines fill whichever of
/// `words`, `lines` and `blocks` they support; the rest stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub text: String,
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Anything that can enumerate the words it holds, at any nesting depth.
pub trait WordSource {
    fn all_words(&self) -> Vec<&Word>;
}

impl WordSource for Line {
    fn all_words(&self) -> Vec<&Word> {
        self.words.iter().collect()
    }
}

impl WordSource for Paragraph {
    fn all_words(&self) -> Vec<&Word> {
        let mut out: Vec<&Word> = self.words.iter().collect();
        out.extend(self.lines.iter().flat_map(|l| l.all_words()));
        out
    }
}

impl WordSource for Block {
    fn all_words(&self) -> Vec<&Word> {
        let mut out: Vec<&Word> = self.words.iter().collect();
        out.extend(self.paragraphs.iter().flat_map(|p| p.all_words()));
        out
    }
}

impl WordSource for Page {
    fn all_words(&self) -> Vec<&Word> {
        let mut out: Vec<&Word> = self.words.iter().collect();
        out.extend(self.lines.iter().flat_map(|l| l.all_words()));
        out.extend(self.blocks.iter().flat_map(|b| b.all_words()));
        out
    }
}

/// Tesseract page segmentation modes used by the local tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PageSegMode {
    /// PSM 3: fully automatic layout analysis.
    Auto,
    /// PSM 4: single column of text of variable sizes.
    SingleColumn,
    /// PSM 6: single uniform block of text.
    SingleBlock,
}

impl PageSegMode {
    pub fn as_tesseract_value(&self) -> &'static str {
        match self {
            PageSegMode::Auto => "3",
            PageSegMode::SingleColumn => "4",
            PageSegMode::SingleBlock => "6",
        }
    }
}

impl From<PageSegMode> for u8 {
    fn from(mode: PageSegMode) -> u8 {
        match mode {
            PageSegMode::Auto => 3,
            PageSegMode::SingleColumn => 4,
            PageSegMode::SingleBlock => 6,
        }
    }
}

impl TryFrom<u8> for PageSegMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            3 => Ok(PageSegMode::Auto),
            4 => Ok(PageSegMode::SingleColumn),
            6 => Ok(PageSegMode::SingleBlock),
            other => Err(format!("unsupported page segmentation mode: {other}")),
        }
    }
}

impl fmt::Display for PageSegMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "psm{}", self.as_tesseract_value())
    }
}

// ═══════════════════════════════════════════════════════════
// Roster output
// ═══════════════════════════════════════════════════════════

/// Horizontal span of a column. `end: None` is unbounded to the right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct XRange {
    pub start: f32,
    pub end: Option<f32>,
}

impl XRange {
    pub fn new(start: f32, end: Option<f32>) -> Self {
        Self { start, end }
    }

    /// Full width: `[0, +inf)`.
    pub fn full() -> Self {
        Self::new(0.0, None)
    }

    /// Half-open containment `[start, end)`.
    pub fn contains(&self, x: f32) -> bool {
        x >= self.start && self.end.map_or(true, |end| x < end)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterColumn {
    pub title: String,
    #[serde(rename = "names")]
    pub entries: Vec<String>,
    /// Present only when the column came from geometric detection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_range: Option<XRange>,
}

impl RosterColumn {
    pub fn new(title: &str, x_range: Option<XRange>) -> Self {
        Self {
            title: title.to_string(),
            entries: Vec::new(),
            x_range,
        }
    }
}

/// Whether the columns reflect detected table structure or a raw-text dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterLayout {
    #[default]
    Structured,
    RawText,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterDocument {
    /// ISO date (`YYYY-MM-DD`) of the roster, when known.
    pub date: Option<NaiveDate>,
    pub columns: Vec<RosterColumn>,
    /// Names the winning strategy plus a text excerpt.
    #[serde(rename = "rawText")]
    pub diagnostics: String,
    #[serde(default)]
    pub layout: RosterLayout,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<ExtractionAttempt>,
}

impl RosterDocument {
    pub fn new(date: Option<NaiveDate>, columns: Vec<RosterColumn>, diagnostics: String) -> Self {
        Self {
            date,
            columns,
            diagnostics,
            layout: RosterLayout::Structured,
            attempts: Vec::new(),
        }
    }

    pub fn total_entries(&self) -> usize {
        self.columns.iter().map(|c| c.entries.len()).sum()
    }

    /// Accepted only with at least one column holding at least one entry.
    pub fn is_valid(&self) -> bool {
        self.total_entries() > 0
    }
}

// ═══════════════════════════════════════════════════════════
// Orchestration bookkeeping
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    LayoutOcr,
    CloudVision,
    LocalOcr,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StrategyKind::LayoutOcr => "layout_ocr",
            StrategyKind::CloudVision => "cloud_vision",
            StrategyKind::LocalOcr => "local_ocr",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Success,
    Empty,
    Error,
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub strategy: StrategyKind,
    pub status: AttemptStatus,
}

// ═══════════════════════════════════════════════════════════
// Targeted lookup
// ═══════════════════════════════════════════════════════════

/// Where one named person sits in the roster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShiftLookup {
    pub found: bool,
    pub date: Option<String>,
    pub target_name: String,
    pub shift: Option<String>,
    /// Service label for outgoing-duty assignments.
    pub service: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub colleagues: Vec<String>,
    pub raw_context: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocateOutcome {
    Found(ShiftLookup),
    /// Person not located; the full roster is returned for manual review.
    NotFound { roster: RosterDocument },
}
