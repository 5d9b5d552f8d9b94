// Shift-column detection from the roster header row.
// The header carries one period keyword per column; column boundaries are
// the midpoints between adjacent keyword centers and stay fixed for the
// rest of the document.

use tracing::debug;

use super::types::{Line, RosterColumn, XRange};
use crate::config::KeywordConfig;

/// Minimum keyword zones for a line to count as the header row.
const MIN_HEADER_ZONES: usize = 2;

/// Detected columns plus the index of the header line they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    pub columns: Vec<RosterColumn>,
    pub header_line: Option<usize>,
}

impl ColumnLayout {
    /// Single column spanning the full width.
    pub fn catch_all(title: &str) -> Self {
        Self {
            columns: vec![RosterColumn::new(title, Some(XRange::full()))],
            header_line: None,
        }
    }

    /// Column whose x-range contains `x`.
    pub fn column_for(&self, x: f32) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.x_range.map_or(false, |r| r.contains(x)))
    }
}

/// Find the header row and derive column x-ranges from it.
pub fn detect_columns(lines: &[Line], keywords: &KeywordConfig) -> ColumnLayout {
    for (idx, line) in lines.iter().enumerate() {
        if keywords.count_shift_keywords(&line.text) < MIN_HEADER_ZONES {
            continue;
        }

        // (center_x, title) per keyword word
        let mut zones: Vec<(f32, String)> = line
            .words
            .iter()
            .filter_map(|w| {
                keywords
                    .shift_keyword_in(&w.text)
                    .map(|k| (w.bbox.center_x(), k.title.clone()))
            })
            .collect();

        if zones.len() < MIN_HEADER_ZONES {
            debug!(
                line = idx,
                zones = zones.len(),
                "Header keywords share a word box, not usable for boundaries"
            );
            continue;
        }

        zones.sort_by(|a, b| a.0.total_cmp(&b.0));
        let centers: Vec<f32> = zones.iter().map(|z| z.0).collect();
        let columns = boundaries_from_centers(&centers)
            .into_iter()
            .zip(zones)
            .map(|(range, (_, title))| RosterColumn::new(&title, Some(range)))
            .collect::<Vec<_>>();

        debug!(
            header_line = idx,
            columns = columns.len(),
            "Detected shift columns"
        );
        return ColumnLayout {
            columns,
            header_line: Some(idx),
        };
    }

    debug!("No header row found, using catch-all column");
    ColumnLayout::catch_all(&keywords.catch_all_title)
}

/// Contiguous ranges partitioning `[0, +inf)` with boundaries at the
/// midpoints of adjacent (sorted) centers.
pub fn boundaries_from_centers(centers: &[f32]) -> Vec<XRange> {
    if centers.is_empty() {
        return vec![XRange::full()];
    }

    let mut ranges = Vec::with_capacity(centers.len());
    let mut start = 0.0_f32;
    for pair in centers.windows(2) {
        let mid = (pair[0] + pair[1]) / 2.0;
        ranges.push(XRange::new(start, Some(mid)));
        start = mid;
    }
    ranges.push(XRange::new(start, None));
    ranges
}
