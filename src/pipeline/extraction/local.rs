use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::column_detect::detect_columns;
use super::date_extract::{extract_date, today};
use super::input::ImageInput;
use super::layout::lines_from_page;
use super::ocr::OcrEngine;
use super::orchestrator::RosterStrategy;
use super::preprocess::prepare_for_ocr;
use super::row_classify::RowClassifier;
use super::sanitize::{diagnostics, raw_text_roster};
use super::types::{Line, Page, PageSegMode, RosterDocument, StrategyKind};
use super::ExtractionError;
use crate::config::ScannerConfig;
use crate::pipeline::until_cancelled;

/// Run blocking work off the async runtime, abandoning it on cancellation.
async fn run_blocking<T, F>(cancel: &CancellationToken, job: F) -> Result<T, ExtractionError>
where
    F: FnOnce() -> Result<T, ExtractionError> + Send + 'static,
    T: Send + 'static,
{
    match until_cancelled(cancel, tokio::task::spawn_blocking(job)).await {
        None => Err(ExtractionError::Cancelled),
        Some(Ok(result)) => result,
        Some(Err(e)) => Err(ExtractionError::OcrProcessing(format!("OCR task failed: {e}"))),
    }
}

/// Columns, classification and date for one set of reconstructed lines.
pub fn build_roster_from_lines(
    lines: &[Line],
    page_text: &str,
    config: &ScannerConfig,
    today: NaiveDate,
    source: &str,
) -> RosterDocument {
    let layout = detect_columns(lines, &config.keywords);
    let columns = RowClassifier::new(&layout, &config.keywords, &config.geometry).assign(lines);

    let text = if page_text.trim().is_empty() {
        lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n")
    } else {
        page_text.to_string()
    };
    let date = extract_date(&text, &config.keywords, today, config.geometry.date_scan_chars);

    RosterDocument::new(Some(date), columns, diagnostics(source, &text))
}

/// On-device OCR followed by geometric reconstruction and classification.
pub struct LocalOcrStrategy {
    engine: Arc<dyn OcrEngine>,
    config: Arc<ScannerConfig>,
}

impl LocalOcrStrategy {
    pub fn new(engine: Arc<dyn OcrEngine>, config: Arc<ScannerConfig>) -> Self {
        Self { engine, config }
    }

    async fn prepare(
        &self,
        image: &ImageInput,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ExtractionError> {
        let bytes = image.bytes().to_vec();
        let original = bytes.clone();
        match run_blocking(cancel, move || prepare_for_ocr(&bytes)).await {
            Ok(png) => Ok(png),
            // The engine's own decoders may still read formats we cannot
            Err(ExtractionError::ImageProcessing(reason)) => {
                warn!(reason = %reason, "Preprocessing failed, passing original bytes to OCR");
                Ok(original)
            }
            Err(e) => Err(e),
        }
    }

    async fn recognize(
        &self,
        png: &[u8],
        mode: PageSegMode,
        cancel: &CancellationToken,
    ) -> Result<Page, ExtractionError> {
        let engine = Arc::clone(&self.engine);
        let input = png.to_vec();
        run_blocking(cancel, move || engine.recognize(&input, mode)).await
    }

    /// Single raw-text column. Only recognized lines become entries, so a
    /// page with nothing readable yields an empty column whose diagnostics
    /// carry `reason`.
    fn fallback(&self, text: &str, reason: &str, today: NaiveDate) -> RosterDocument {
        let mut doc = raw_text_roster(text, "local_ocr", &self.config, today);
        if !doc.is_valid() {
            doc.diagnostics = format!("[local_ocr, unstructured text] {reason}");
        }
        doc
    }
}

#[async_trait]
impl RosterStrategy for LocalOcrStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LocalOcr
    }

    async fn extract(
        &self,
        image: &ImageInput,
        cancel: &CancellationToken,
    ) -> Result<RosterDocument, ExtractionError> {
        let png = self.prepare(image, cancel).await?;
        let today = today();
        let mut leftover_text = String::new();

        for &mode in &self.config.local_ocr.page_seg_modes {
            let started = Instant::now();
            let page = match self.recognize(&png, mode, cancel).await {
                Ok(page) => page,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(psm = %mode, error = %e, "Local OCR failed, returning raw text");
                    let reason = format!("OCR failed under {mode}: {e}");
                    return Ok(self.fallback(&leftover_text, &reason, today));
                }
            };
            let lines = lines_from_page(&page, &self.config.geometry);

            info!(
                psm = %mode,
                lines = lines.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Local OCR pass complete"
            );

            if lines.is_empty() {
                if !page.text.trim().is_empty() {
                    leftover_text = page.text;
                }
                continue;
            }

            let source = format!("local_ocr {mode}");
            let doc = build_roster_from_lines(&lines, &page.text, &self.config, today, &source);
            if doc.is_valid() {
                info!(
                    psm = %mode,
                    columns = doc.columns.len(),
                    entries = doc.total_entries(),
                    "Roster reconstructed"
                );
                return Ok(doc);
            }

            debug!(psm = %mode, "Lines found but no entries classified, using raw text");
            let text = if page.text.trim().is_empty() {
                lines.iter().map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n")
            } else {
                page.text
            };
            let reason = format!("{} lines under {mode} but nothing usable", lines.len());
            return Ok(self.fallback(&text, &reason, today));
        }

        let tried = self
            .config
            .local_ocr
            .page_seg_modes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        warn!(tried = %tried, "No reconstructable lines under any segmentation mode, returning raw text");
        Ok(self.fallback(
            &leftover_text,
            &format!("no text detected (tried {tried})"),
            today,
        ))
    }
}

/// Photographed-roster fixture: title, header, three normal entries,
/// then an outgoing block with one labelled entry. Words live in a block
/// so the nested shape is exercised.
#[cfg(test)]
pub(crate) fn roster_page() -> Page {
    use super::types::{Block, BoundingBox, Word};

    fn words_from(text: &str, x: f32, cy: f32) -> Vec<Word> {
        let mut cursor = x;
        text.split_whitespace()
            .map(|t| {
                let width = t.chars().count() as f32 * 8.0;
                let w = Word::new(t, BoundingBox::new(cursor, cy - 8.0, cursor + width, cy + 8.0), 0.9);
                cursor += width + 6.0;
                w
            })
            .collect()
    }

    let cells: &[(&str, f32, f32)] = &[
        ("SERVICIOS PARA EL DIA 15 DE MARZO", 60.0, 10.0),
        ("MAÑANA", 76.0, 50.0),
        ("TARDE", 280.0, 50.0),
        ("NOCHE", 480.0, 50.0),
        ("G.C. LOPEZ, J.", 60.0, 100.0),
        ("CABO RUIZ, A.", 240.0, 100.0),
        ("SGT PEREZ, M.", 440.0, 100.0),
        ("SALIENTES", 60.0, 150.0),
        ("PUERTAS", 250.0, 200.0),
        ("G.C. MORA, L.", 240.0, 250.0),
    ];
    let words = cells
        .iter()
        .flat_map(|(text, x, cy)| words_from(text, *x, *cy))
        .collect();

    Page {
        text: "SERVICIOS PARA EL DIA 15 DE MARZO DE 2024\nMAÑANA TARDE NOCHE\nG.C. LOPEZ, J. CABO RUIZ, A. SGT PEREZ, M.\nSALIENTES\nPUERTAS\nG.C. MORA, L.".into(),
        words: Vec::new(),
        lines: Vec::new(),
        blocks: vec![Block {
            words,
            paragraphs: Vec::new(),
        }],
    }
}
