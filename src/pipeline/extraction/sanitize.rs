use chrono::NaiveDate;

use super::date_extract::extract_date;
use super::types::{RosterColumn, RosterDocument, RosterLayout, XRange};
use crate::config::ScannerConfig;

/// Characters of recognized text quoted in diagnostics.
const EXCERPT_CHARS: usize = 300;

/// Strip control characters and stray symbols, keeping the punctuation
/// roster names and ranks use. Lines are trimmed; blank lines dropped.
pub fn sanitize_extracted_text(raw: &str) -> String {
    raw.chars()
        .filter(|c| {
            c.is_alphanumeric()
                || *c == '\n'
                || *c == ' '
                || *c == '\t'
                || matches!(c, '.' | ',' | ';' | ':' | '-' | '/' | '(' | ')' | '\'' | 'º' | 'ª')
        })
        .collect::<String>()
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Sanitized lines long enough to carry a name.
pub fn raw_lines(raw: &str, min_chars: usize) -> Vec<String> {
    sanitize_extracted_text(raw)
        .lines()
        .filter(|l| l.chars().count() >= min_chars)
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect()
}

/// `[source] excerpt` string stored in `RosterDocument::diagnostics`.
pub fn diagnostics(source: &str, text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut excerpt: String = flat.chars().take(EXCERPT_CHARS).collect();
    if flat.chars().count() > EXCERPT_CHARS {
        excerpt.push('…');
    }
    format!("[{source}] {excerpt}")
}

/// Single-column roster of noise-filtered text, tagged as unstructured.
pub fn raw_text_roster(
    raw: &str,
    source: &str,
    config: &ScannerConfig,
    today: NaiveDate,
) -> RosterDocument {
    let mut column = RosterColumn::new(&config.keywords.raw_text_title, Some(XRange::full()));
    column.entries = raw_lines(raw, config.geometry.min_fragment_chars);

    let date = extract_date(raw, &config.keywords, today, config.geometry.date_scan_chars);
    let mut doc = RosterDocument::new(
        Some(date),
        vec![column],
        diagnostics(&format!("{source}, unstructured text"), raw),
    );
    doc.layout = RosterLayout::RawText;
    doc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters() {
        let clean = sanitize_extracted_text("G.C. LOPEZ\x00, J.\x07\n\x1b[0mCABO RUIZ");
        assert_eq!(clean, "G.C. LOPEZ, J.\n0mCABO RUIZ");
    }

    #[test]
    fn keeps_roster_punctuation() {
        let clean = sanitize_extracted_text("SGT. PÉREZ-GIL, Mª (2º)");
        assert_eq!(clean, "SGT. PÉREZ-GIL, Mª (2º)");
    }

    #[test]
    fn raw_lines_drop_short_and_blank() {
        let lines = raw_lines("  ab \n\n G.C.   LOPEZ \n 12 \nCABO RUIZ\r\n", 4);
        assert_eq!(lines, vec!["G.C. LOPEZ", "CABO RUIZ"]);
    }

    #[test]
    fn diagnostics_truncate_long_text() {
        let long = "PALABRA ".repeat(100);
        let diag = diagnostics("local_ocr", &long);
        assert!(diag.starts_with("[local_ocr] PALABRA"));
        assert!(diag.ends_with('…'));
        assert!(diag.chars().count() < 320);
    }

    #[test]
    fn raw_roster_is_tagged_and_dated() {
        let config = ScannerConfig::default();
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let doc = raw_text_roster("SERVICIOS 15 DE MARZO\nG.C. LOPEZ\nxx", "layout_ocr", &config, today);

        assert_eq!(doc.layout, RosterLayout::RawText);
        assert_eq!(doc.columns.len(), 1);
        assert_eq!(doc.columns[0].title, config.keywords.raw_text_title);
        assert_eq!(doc.columns[0].entries, vec!["SERVICIOS 15 DE MARZO", "G.C. LOPEZ"]);
        assert_eq!(doc.date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert!(doc.diagnostics.starts_with("[layout_ocr, unstructured text]"));
        assert!(doc.is_valid());
    }

    #[test]
    fn raw_roster_of_noise_is_invalid() {
        let config = ScannerConfig::default();
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let doc = raw_text_roster("\x00\x01 ab\n-- \n", "local_ocr", &config, today);
        assert!(!doc.is_valid());
        assert_eq!(doc.date, Some(today));
    }
}
