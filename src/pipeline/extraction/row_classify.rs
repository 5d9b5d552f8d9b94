//! Row classification and column assignment.
//!
//! Lines are folded through a [`ClassifierState`]. Two regimes apply:
//! the normal shift grid, where every surviving fragment is a person, and
//! the outgoing-duty block (after a marker line such as `SALIENTES`), where
//! fragments are either service headers that label the column or people
//! assigned to the current label. Once the outgoing block starts it never ends.

use std::collections::HashMap;

use tracing::{debug, trace};

use super::column_detect::ColumnLayout;
use super::types::{Line, RosterColumn};
use crate::config::{GeometryConfig, KeywordConfig};

/// Running state threaded through the fold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierState {
    pub in_outgoing: bool,
    /// Current service label per column index (outgoing block only).
    pub section_labels: HashMap<usize, String>,
    /// Entries per column index.
    pub entries: Vec<Vec<String>>,
}

impl ClassifierState {
    pub fn new(column_count: usize) -> Self {
        Self {
            in_outgoing: false,
            section_labels: HashMap::new(),
            entries: vec![Vec::new(); column_count],
        }
    }
}

/// Decision for one column fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fragment {
    Entry(String),
    SectionLabel(String),
    Rejected,
}

pub struct RowClassifier<'a> {
    layout: &'a ColumnLayout,
    keywords: &'a KeywordConfig,
    geometry: &'a GeometryConfig,
}

impl<'a> RowClassifier<'a> {
    pub fn new(
        layout: &'a ColumnLayout,
        keywords: &'a KeywordConfig,
        geometry: &'a GeometryConfig,
    ) -> Self {
        Self {
            layout,
            keywords,
            geometry,
        }
    }

    /// Fold all lines from a fresh state.
    pub fn classify(&self, lines: &[Line]) -> ClassifierState {
        lines
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != self.layout.header_line)
            .fold(ClassifierState::new(self.layout.columns.len()), |state, (_, line)| {
                self.step(state, line)
            })
    }

    /// Columns from the layout, filled with classified entries.
    pub fn assign(&self, lines: &[Line]) -> Vec<RosterColumn> {
        let state = self.classify(lines);
        self.layout
            .columns
            .iter()
            .cloned()
            .zip(state.entries)
            .map(|(mut column, entries)| {
                column.entries = entries;
                column
            })
            .collect()
    }

    /// Advance the state by one line.
    pub fn step(&self, mut state: ClassifierState, line: &Line) -> ClassifierState {
        let text = line.text.trim();
        if text.chars().count() < self.geometry.min_line_chars {
            trace!(line = %text, "Skipping short line");
            return state;
        }

        let upper = text.to_uppercase();
        if self.keywords.is_outgoing_marker(&upper) {
            if !state.in_outgoing {
                debug!(line = %text, "Outgoing-duty section starts");
            }
            state.in_outgoing = true;
            return state;
        }

        if !state.in_outgoing
            && (self.keywords.is_noise_line(&upper) || self.keywords.count_shift_keywords(&upper) >= 2)
        {
            trace!(line = %text, "Skipping header/noise line");
            return state;
        }

        for (col, fragment) in self.bucket_words(line) {
            let decision = if state.in_outgoing {
                let label = state
                    .section_labels
                    .get(&col)
                    .map(String::as_str)
                    .unwrap_or(self.keywords.default_outgoing_label.as_str());
                self.classify_outgoing(&fragment, label)
            } else {
                self.classify_normal(&fragment)
            };

            trace!(column = col, fragment = %fragment, decision = ?decision, "Classified fragment");
            match decision {
                Fragment::Entry(entry) => {
                    if let Some(bucket) = state.entries.get_mut(col) {
                        bucket.push(entry);
                    }
                }
                Fragment::SectionLabel(label) => {
                    state.section_labels.insert(col, label);
                }
                Fragment::Rejected => {}
            }
        }

        state
    }

    /// Join each column's words (by center-x membership) into one fragment.
    fn bucket_words(&self, line: &Line) -> Vec<(usize, String)> {
        let mut buckets: Vec<Vec<&str>> = vec![Vec::new(); self.layout.columns.len()];
        let mut words: Vec<_> = line.words.iter().collect();
        words.sort_by(|a, b| a.bbox.x0.total_cmp(&b.bbox.x0));

        for word in words {
            if let Some(col) = self.layout.column_for(word.bbox.center_x()) {
                buckets[col].push(word.text.as_str());
            }
        }

        buckets
            .into_iter()
            .enumerate()
            .filter_map(|(col, parts)| {
                let fragment = parts.join(" ").trim().to_string();
                (!fragment.is_empty()).then_some((col, fragment))
            })
            .collect()
    }

    pub fn classify_normal(&self, fragment: &str) -> Fragment {
        if fragment.chars().count() < self.geometry.min_fragment_chars || is_numeric(fragment) {
            return Fragment::Rejected;
        }
        if self.keywords.is_leaked_header(&fragment.to_uppercase()) {
            return Fragment::Rejected;
        }
        Fragment::Entry(fragment.to_string())
    }

    /// Service keyword → label; rank-prefixed or comma fragment → person;
    /// anything else with enough letters → label. Short capitalised
    /// fragments without a comma therefore read as headers.
    pub fn classify_outgoing(&self, fragment: &str, current_label: &str) -> Fragment {
        let upper = fragment.to_uppercase();
        let long_enough = |s: &str| s.chars().count() >= self.geometry.min_fragment_chars;

        if let Some(service) = self.keywords.matched_service(&upper) {
            let cleaned = clean_header_text(&upper);
            let label = if long_enough(&cleaned) {
                cleaned
            } else {
                service.to_string()
            };
            return Fragment::SectionLabel(label);
        }

        let name_like = self.keywords.has_rank_prefix(fragment) || fragment.contains(',');
        if name_like && !is_numeric(fragment) && long_enough(fragment) {
            return Fragment::Entry(format!(
                "({} {}) {}",
                self.keywords.outgoing_entry_tag, current_label, fragment
            ));
        }

        let cleaned = clean_header_text(&upper);
        if long_enough(&cleaned) {
            Fragment::SectionLabel(cleaned)
        } else {
            Fragment::Rejected
        }
    }
}

/// No letters at all (dates, phone numbers, shift hours).
fn is_numeric(fragment: &str) -> bool {
    !fragment.chars().any(char::is_alphabetic)
}

/// Keep only `A-Z`, `Ñ` and spaces; collapse the rest.
pub fn clean_header_text(upper: &str) -> String {
    upper
        .chars()
        .map(|c| if c.is_ascii_uppercase() || c == 'Ñ' || c.is_whitespace() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::column_detect::{boundaries_from_centers, detect_columns};
    use crate::pipeline::extraction::types::{BoundingBox, Word};

    fn three_columns() -> ColumnLayout {
        let titles = ["MAÑANA (06-14)", "TARDE (14-22)", "NOCHE (22-06)"];
        ColumnLayout {
            columns: boundaries_from_centers(&[100.0, 300.0, 500.0])
                .into_iter()
                .zip(titles)
                .map(|(r, t)| RosterColumn::new(t, Some(r)))
                .collect(),
            header_line: None,
        }
    }

    /// Words placed left to right from `x`, each 8px per char + 6px gap.
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

    fn row(cells: &[(&str, f32)], cy: f32) -> Line {
        let words = cells
            .iter()
            .flat_map(|(text, x)| words_from(text, *x, cy))
            .collect();
        Line::from_words(words).unwrap()
    }

    fn run(lines: &[Line]) -> ClassifierState {
        let layout = three_columns();
        let keywords = KeywordConfig::default();
        let geometry = GeometryConfig::default();
        RowClassifier::new(&layout, &keywords, &geometry).classify(lines)
    }

    #[test]
    fn normal_rows_become_plain_entries() {
        let state = run(&[
            row(&[("G.C. LOPEZ, J.", 60.0), ("CABO RUIZ, A.", 240.0), ("SGT PEREZ, M.", 440.0)], 100.0),
            row(&[("G.C. MORA, L.", 60.0)], 130.0),
        ]);
        assert!(!state.in_outgoing);
        assert_eq!(state.entries[0], vec!["G.C. LOPEZ, J.", "G.C. MORA, L."]);
        assert_eq!(state.entries[1], vec!["CABO RUIZ, A."]);
        assert_eq!(state.entries[2], vec!["SGT PEREZ, M."]);
    }

    #[test]
    fn normal_section_rejects_noise() {
        let state = run(&[
            row(&[("SERVICIOS PARA EL DIA", 60.0)], 20.0),
            row(&[("COMANDANCIA DE MADRID", 60.0)], 40.0),
            row(&[("MAÑANA", 70.0), ("TARDE", 280.0), ("NOCHE", 480.0)], 60.0),
            row(&[("06:00", 60.0), ("PUERTAS", 240.0), ("XY", 440.0)], 100.0),
            row(&[("G.C.", 60.0)], 130.0),
        ]);
        assert!(state.entries.iter().all(Vec::is_empty), "got {:?}", state.entries);
    }

    #[test]
    fn outgoing_keyword_labels_following_names() {
        let state = run(&[
            row(&[("SALIENTES", 60.0)], 200.0),
            row(&[("PUERTAS", 250.0)], 230.0),
            row(&[("G.C. LOPEZ, J.", 240.0)], 260.0),
        ]);
        assert!(state.in_outgoing);
        assert_eq!(state.section_labels.get(&1).map(String::as_str), Some("PUERTAS"));
        assert_eq!(state.entries[1], vec!["(OUTGOING PUERTAS) G.C. LOPEZ, J."]);
    }

    #[test]
    fn outgoing_labels_are_per_column() {
        let state = run(&[
            row(&[("SALIENTES", 60.0)], 200.0),
            row(&[("PATRULLA", 60.0), ("CONTROLES", 250.0)], 230.0),
            row(&[("CABO DIAZ, R.", 60.0), ("GC. SOTO, P.", 240.0), ("TTE GIL, F.", 440.0)], 260.0),
        ]);
        assert_eq!(state.entries[0], vec!["(OUTGOING PATRULLA) CABO DIAZ, R."]);
        assert_eq!(state.entries[1], vec!["(OUTGOING CONTROLES) GC. SOTO, P."]);
        assert_eq!(state.entries[2], vec!["(OUTGOING SERVICIO) TTE GIL, F."]);
    }

    #[test]
    fn unknown_capitalised_fragment_becomes_label() {
        let state = run(&[
            row(&[("SALIENTES", 60.0)], 200.0),
            row(&[("OFICINA 2", 60.0)], 230.0),
            row(&[("G.C. LOPEZ", 60.0)], 260.0),
        ]);
        assert_eq!(state.section_labels.get(&0).map(String::as_str), Some("OFICINA"));
        assert_eq!(state.entries[0], vec!["(OUTGOING OFICINA) G.C. LOPEZ"]);
    }

    #[test]
    fn outgoing_section_never_reverts() {
        // Noise and header lines after the marker are still read under outgoing rules
        let state = run(&[
            row(&[("SALIENTES", 60.0)], 200.0),
            row(&[("MAÑANA", 70.0), ("TARDE", 280.0)], 230.0),
            row(&[("RUIZ, A.", 60.0)], 260.0),
        ]);
        assert!(state.in_outgoing);
        assert_eq!(state.entries[0], vec!["(OUTGOING MAÑANA) RUIZ, A."]);
        assert!(state.entries[0].iter().all(|e| e.starts_with("(OUTGOING")));
    }

    #[test]
    fn step_is_monotonic_on_marker() {
        let layout = three_columns();
        let keywords = KeywordConfig::default();
        let geometry = GeometryConfig::default();
        let classifier = RowClassifier::new(&layout, &keywords, &geometry);

        let mut state = ClassifierState::new(3);
        for line in [
            row(&[("SALIENTES", 60.0)], 10.0),
            row(&[("SERVICIOS PARA", 60.0)], 40.0),
            row(&[("G.C. LOPEZ, J.", 60.0)], 70.0),
            row(&[("ACUARTELAMIENTO", 240.0)], 100.0),
        ] {
            state = classifier.step(state, &line);
            assert!(state.in_outgoing);
        }
    }

    #[test]
    fn short_lines_are_skipped_before_marker_check() {
        let state = run(&[row(&[("SAL", 60.0)], 10.0), row(&[("G.C. LOPEZ", 60.0)], 40.0)]);
        assert!(!state.in_outgoing);
        assert_eq!(state.entries[0], vec!["G.C. LOPEZ"]);
    }

    #[test]
    fn outgoing_fragment_classification() {
        let layout = three_columns();
        let keywords = KeywordConfig::default();
        let geometry = GeometryConfig::default();
        let c = RowClassifier::new(&layout, &keywords, &geometry);

        assert_eq!(
            c.classify_outgoing("PLANA MAYOR (2)", "SERVICIO"),
            Fragment::SectionLabel("PLANA MAYOR".into())
        );
        assert_eq!(
            c.classify_outgoing("Sgt Vega", "PUERTAS"),
            Fragment::Entry("(OUTGOING PUERTAS) Sgt Vega".into())
        );
        assert_eq!(c.classify_outgoing("12, 14", "PUERTAS"), Fragment::Rejected);
        assert_eq!(c.classify_outgoing("A,B", "X"), Fragment::Rejected);
        assert_eq!(c.classify_outgoing("ÁÉ", "X"), Fragment::Rejected);
    }

    #[test]
    fn assign_fills_detected_columns() {
        let header = row(&[("MAÑANA", 70.0), ("TARDE", 280.0), ("NOCHE", 480.0)], 50.0);
        let lines = vec![
            header,
            row(&[("G.C. LOPEZ, J.", 60.0), ("CABO RUIZ, A.", 240.0)], 100.0),
        ];
        let keywords = KeywordConfig::default();
        let geometry = GeometryConfig::default();
        let layout = detect_columns(&lines, &keywords);
        let columns = RowClassifier::new(&layout, &keywords, &geometry).assign(&lines);

        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].entries, vec!["G.C. LOPEZ, J."]);
        assert_eq!(columns[1].entries, vec!["CABO RUIZ, A."]);
        assert!(columns[2].entries.is_empty());
    }

    #[test]
    fn cleans_header_text() {
        assert_eq!(clean_header_text("PUERTAS (3) - NORTE"), "PUERTAS NORTE");
        assert_eq!(clean_header_text("ACUARTELAMIENTO/ESPAÑA"), "ACUARTELAMIENTO ESPAÑA");
        assert_eq!(clean_header_text("123"), "");
    }
}
