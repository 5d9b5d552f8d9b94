use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use super::types::{Block, BoundingBox, Line, Page, PageSegMode, Paragraph, Word};
use super::ExtractionError;
use crate::config::LocalOcrConfig;

/// On-device recognizer. Blocking; callers run it on a blocking thread.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image_png: &[u8], mode: PageSegMode) -> Result<Page, ExtractionError>;
}

/// Locate a tessdata directory holding the configured language pack.
///
/// Order: configured dir (`TESSDATA_PREFIX` lands here), then common system paths.
pub fn find_tessdata_dir(config: &LocalOcrConfig) -> Result<PathBuf, ExtractionError> {
    let primary_lang = config.language.split('+').next().unwrap_or("spa");
    let pack = format!("{primary_lang}.traineddata");

    if let Some(dir) = &config.tessdata_dir {
        if dir.join(&pack).exists() {
            return Ok(dir.clone());
        }
        tracing::warn!(
            dir = %dir.display(),
            pack = %pack,
            "Configured tessdata dir lacks language pack, searching system paths"
        );
    }

    let candidates = [
        "/usr/share/tesseract-ocr/5/tessdata",
        "/usr/share/tesseract-ocr/4.00/tessdata",
        "/usr/share/tessdata",
        "/usr/local/share/tessdata",
        "/opt/homebrew/share/tessdata",
    ];

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|p| p.join(&pack).exists())
        .ok_or_else(|| {
            ExtractionError::OcrInit(format!(
                "Tesseract data directory with {pack} not found. Set TESSDATA_PREFIX or install the language pack"
            ))
        })
}

/// Tesseract engine linked through the `tesseract` crate.
/// Only available when compiled with the `ocr` feature flag.
#[cfg(feature = "ocr")]
pub struct BundledTesseract {
    tessdata_dir: PathBuf,
    language: String,
}

#[cfg(feature = "ocr")]
impl BundledTesseract {
    pub fn from_config(config: &LocalOcrConfig) -> Result<Self, ExtractionError> {
        let tessdata_dir = find_tessdata_dir(config)?;
        tracing::info!(
            tessdata = %tessdata_dir.display(),
            language = %config.language,
            "Tesseract engine ready"
        );
        Ok(Self {
            tessdata_dir,
            language: config.language.clone(),
        })
    }
}

#[cfg(feature = "ocr")]
impl OcrEngine for BundledTesseract {
    fn recognize(&self, image_png: &[u8], mode: PageSegMode) -> Result<Page, ExtractionError> {
        let tessdata_str = self
            .tessdata_dir
            .to_str()
            .ok_or_else(|| ExtractionError::OcrInit("Invalid tessdata path".into()))?;

        let mut tess = tesseract::Tesseract::new(Some(tessdata_str), Some(&self.language))
            .map_err(|e| ExtractionError::OcrInit(format!("{e:?}")))?
            .set_variable("tessedit_pageseg_mode", mode.as_tesseract_value())
            .map_err(|e| ExtractionError::OcrInit(format!("Failed to set {mode}: {e:?}")))?
            .set_image_from_mem(image_png)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        let text = tess
            .get_text()
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;
        let tsv = tess
            .get_tsv_text(0)
            .map_err(|e| ExtractionError::OcrProcessing(format!("{e:?}")))?;

        Ok(parse_tsv_page(&tsv, text))
    }
}

/// Parse Tesseract TSV into the nested block → paragraph → line → word shape.
///
/// Columns: level page_num block_num par_num line_num word_num left top width height conf text.
/// Only level 5 (word) rows carry text; their ids place them in the tree.
/// Top-level `Page::lines` stays empty so the geometric reconstructor regroups
/// rows across Tesseract's per-cell blocks.
pub fn parse_tsv_page(tsv: &str, text: String) -> Page {
    // block -> paragraph -> line -> words, ordered by Tesseract ids
    let mut tree: BTreeMap<u32, BTreeMap<u32, BTreeMap<u32, Vec<Word>>>> = BTreeMap::new();

    for row in tsv.lines() {
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }

        let word_text = fields[11].trim();
        if word_text.is_empty() {
            continue;
        }

        let Some((block, par, line)) = parse_ids(fields[2], fields[3], fields[4]) else {
            continue;
        };
        let Some(bbox) = parse_ltwh(fields[6], fields[7], fields[8], fields[9]) else {
            continue;
        };

        // Tesseract reports -1 for words without a confidence
        let conf: f32 = fields[10].parse().unwrap_or(-1.0);
        let confidence = if conf < 0.0 { 0.0 } else { conf / 100.0 };

        tree.entry(block)
            .or_default()
            .entry(par)
            .or_default()
            .entry(line)
            .or_default()
            .push(Word::new(word_text, bbox, confidence));
    }

    let blocks = tree
        .into_values()
        .map(|paragraphs| Block {
            words: Vec::new(),
            paragraphs: paragraphs
                .into_values()
                .map(|lines| Paragraph {
                    words: Vec::new(),
                    lines: lines.into_values().filter_map(Line::from_words).collect(),
                })
                .collect(),
        })
        .collect();

    Page {
        text,
        words: Vec::new(),
        lines: Vec::new(),
        blocks,
    }
}

fn parse_ids(block: &str, par: &str, line: &str) -> Option<(u32, u32, u32)> {
    Some((block.parse().ok()?, par.parse().ok()?, line.parse().ok()?))
}

fn parse_ltwh(left: &str, top: &str, width: &str, height: &str) -> Option<BoundingBox> {
    Some(BoundingBox::from_ltwh(
        left.parse().ok()?,
        top.parse().ok()?,
        width.parse().ok()?,
        height.parse().ok()?,
    ))
}

/// Mock OCR engine for unit testing without Tesseract.
///
/// Returns a per-mode page when one is registered, the default page otherwise,
/// and records the modes it was asked for.
pub struct MockOcrEngine {
    default_page: Page,
    pages: HashMap<PageSegMode, Page>,
    failure: Option<String>,
    calls: Mutex<Vec<PageSegMode>>,
}

impl MockOcrEngine {
    pub fn new(page: Page) -> Self {
        Self {
            default_page: page,
            pages: HashMap::new(),
            failure: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_page_for(mut self, mode: PageSegMode, page: Page) -> Self {
        self.pages.insert(mode, page);
        self
    }

    pub fn failing(message: &str) -> Self {
        let mut engine = Self::new(Page::default());
        engine.failure = Some(message.to_string());
        engine
    }

    pub fn calls(&self) -> Vec<PageSegMode> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl OcrEngine for MockOcrEngine {
    fn recognize(&self, _image_png: &[u8], mode: PageSegMode) -> Result<Page, ExtractionError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(mode);
        }
        if let Some(message) = &self.failure {
            return Err(ExtractionError::OcrProcessing(message.clone()));
        }
        Ok(self.pages.get(&mode).unwrap_or(&self.default_page).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::types::WordSource;

    const TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext
1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t
2\t1\t1\t0\t0\t0\t80\t40\t460\t20\t-1\t
5\t1\t1\t1\t1\t1\t80\t40\t60\t20\t91.5\tMAÑANA
5\t1\t1\t1\t1\t2\t280\t42\t50\t20\t88\tTARDE
5\t1\t2\t1\t1\t1\t480\t41\t50\t20\t-1\tNOCHE
5\t1\t2\t1\t2\t1\t70\t90\t120\t20\t76\t G.C.
5\t1\t2\t1\t2\t2\t200\t90\t20\t20\t50\t
5\t1\t2\t1\t2\tx\tbad\t90\t20\t20\t50\tBROKEN";

    #[test]
    fn tsv_builds_nested_tree() {
        let page = parse_tsv_page(TSV, "MAÑANA TARDE NOCHE".into());
        assert!(page.lines.is_empty());
        assert_eq!(page.blocks.len(), 2);
        assert_eq!(page.blocks[0].paragraphs[0].lines[0].text, "MAÑANA TARDE");
        assert_eq!(page.blocks[1].paragraphs[0].lines.len(), 2);
        assert_eq!(page.text, "MAÑANA TARDE NOCHE");
    }

    #[test]
    fn tsv_words_keep_geometry_and_confidence() {
        let page = parse_tsv_page(TSV, String::new());
        let words = page.all_words();
        assert_eq!(words.len(), 4, "blank and malformed rows are skipped");

        let manana = words.iter().find(|w| w.text == "MAÑANA").unwrap();
        assert_eq!(manana.bbox, BoundingBox::new(80.0, 40.0, 140.0, 60.0));
        assert!((manana.confidence - 0.915).abs() < 1e-4);

        let noche = words.iter().find(|w| w.text == "NOCHE").unwrap();
        assert_eq!(noche.confidence, 0.0);

        assert!(words.iter().any(|w| w.text == "G.C."), "word text is trimmed");
    }

    #[test]
    fn tsv_empty_input_gives_empty_page() {
        let page = parse_tsv_page("", String::new());
        assert!(page.blocks.is_empty());
        assert!(page.all_words().is_empty());
    }

    #[test]
    fn mock_returns_mode_specific_page_and_records_calls() {
        let special = Page {
            text: "psm6".into(),
            ..Page::default()
        };
        let engine = MockOcrEngine::new(Page::default())
            .with_page_for(PageSegMode::SingleBlock, special);

        assert_eq!(engine.recognize(b"png", PageSegMode::Auto).unwrap().text, "");
        assert_eq!(engine.recognize(b"png", PageSegMode::SingleBlock).unwrap().text, "psm6");
        assert_eq!(engine.calls(), vec![PageSegMode::Auto, PageSegMode::SingleBlock]);
    }

    #[test]
    fn failing_mock_reports_processing_error() {
        let engine = MockOcrEngine::failing("engine crashed");
        let err = engine.recognize(b"png", PageSegMode::Auto).unwrap_err();
        assert!(matches!(err, ExtractionError::OcrProcessing(_)));
    }

    #[test]
    fn tessdata_search_uses_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("spa.traineddata"), b"stub").unwrap();
        let config = LocalOcrConfig {
            tessdata_dir: Some(dir.path().to_path_buf()),
            ..LocalOcrConfig::default()
        };
        assert_eq!(find_tessdata_dir(&config).unwrap(), dir.path());
    }

    #[test]
    fn tessdata_search_fails_for_unknown_language() {
        let config = LocalOcrConfig {
            tessdata_dir: None,
            language: "zzz_nonexistent".into(),
            ..LocalOcrConfig::default()
        };
        assert!(matches!(
            find_tessdata_dir(&config),
            Err(ExtractionError::OcrInit(_))
        ));
    }

    #[cfg(feature = "ocr")]
    #[test]
    fn bundled_tesseract_rejects_missing_tessdata() {
        let dir = tempfile::tempdir().unwrap();
        let config = LocalOcrConfig {
            tessdata_dir: Some(dir.path().to_path_buf()),
            language: "zzz_nonexistent".into(),
            ..LocalOcrConfig::default()
        };
        assert!(BundledTesseract::from_config(&config).is_err());
    }
}
