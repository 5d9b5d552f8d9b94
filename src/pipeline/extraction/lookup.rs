use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::types::{RosterDocument, RosterLayout, ShiftLookup};
use crate::config::KeywordConfig;

/// `(HH-HH)` hour range in a column title such as `TARDE (14-22)`.
static TITLE_HOURS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\((\d{1,2})\s*-\s*(\d{1,2})\)").expect("title hours pattern is valid")
});

fn tokens(text: &str) -> Vec<String> {
    text.to_uppercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Start and end time (`HH:00`) parsed from a column title.
pub fn shift_hours(title: &str) -> Option<(String, String)> {
    let caps = TITLE_HOURS.captures(title)?;
    let start: u32 = caps.get(1)?.as_str().parse().ok()?;
    let end: u32 = caps.get(2)?.as_str().parse().ok()?;
    Some((format!("{start:02}:00"), format!("{end:02}:00")))
}

/// Split `"(<tag> <label>) <name>"` into label and name.
fn split_outgoing<'a>(entry: &'a str, keywords: &KeywordConfig) -> (Option<&'a str>, &'a str) {
    let prefix = format!("({} ", keywords.outgoing_entry_tag);
    if let Some(rest) = entry.strip_prefix(prefix.as_str()) {
        if let Some((label, name)) = rest.split_once(')') {
            return (Some(label.trim()), name.trim());
        }
    }
    (None, entry)
}

/// Find `name` in an extracted roster. Every token of the name must
/// appear in the entry, so surname-only queries match full entries.
///
/// Unstructured rosters carry no shift columns, so nothing in them can be
/// reported as an assignment.
pub fn lookup_in_roster(
    roster: &RosterDocument,
    name: &str,
    keywords: &KeywordConfig,
) -> Option<ShiftLookup> {
    if roster.layout == RosterLayout::RawText {
        debug!("Roster is unstructured text, no shift to report");
        return None;
    }

    let wanted = tokens(name);
    if wanted.is_empty() {
        return None;
    }

    for column in &roster.columns {
        for (idx, entry) in column.entries.iter().enumerate() {
            let (service, person) = split_outgoing(entry, keywords);
            let have: HashSet<String> = tokens(person).into_iter().collect();
            if !wanted.iter().all(|t| have.contains(t)) {
                continue;
            }

            // Colleagues share the column and the same section
            let colleagues = column
                .entries
                .iter()
                .enumerate()
                .filter(|(other, _)| *other != idx)
                .map(|(_, e)| split_outgoing(e, keywords))
                .filter(|(other_service, _)| *other_service == service)
                .map(|(_, p)| p.to_string())
                .collect();

            let (start_time, end_time) = match shift_hours(&column.title) {
                Some((s, e)) => (Some(s), Some(e)),
                None => (None, None),
            };

            return Some(ShiftLookup {
                found: true,
                date: roster.date.map(|d| d.to_string()),
                target_name: name.trim().to_string(),
                shift: Some(column.title.clone()),
                service: service.map(str::to_string),
                start_time,
                end_time,
                colleagues,
                raw_context: Some(entry.clone()),
            });
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::extraction::types::RosterColumn;
    use chrono::NaiveDate;

    fn roster() -> RosterDocument {
        let mut manana = RosterColumn::new("MAÑANA (06-14)", None);
        manana.entries = vec!["G.C. LOPEZ, J.".into(), "G.C. MORA, L.".into()];
        let mut tarde = RosterColumn::new("TARDE (14-22)", None);
        tarde.entries = vec![
            "CABO RUIZ, A.".into(),
            "(OUTGOING PUERTAS) SGT PEREZ, M.".into(),
            "(OUTGOING PUERTAS) G.C. GIL, F.".into(),
        ];
        let mut unica = RosterColumn::new("TURNO ÚNICO", None);
        unica.entries = vec!["TTE NUÑEZ".into()];
        RosterDocument::new(
            NaiveDate::from_ymd_opt(2024, 3, 15),
            vec![manana, tarde, unica],
            String::new(),
        )
    }

    #[test]
    fn finds_normal_entry_with_colleagues_and_hours() {
        let found = lookup_in_roster(&roster(), "lopez", &KeywordConfig::default()).unwrap();
        assert!(found.found);
        assert_eq!(found.target_name, "lopez");
        assert_eq!(found.shift.as_deref(), Some("MAÑANA (06-14)"));
        assert_eq!(found.start_time.as_deref(), Some("06:00"));
        assert_eq!(found.end_time.as_deref(), Some("14:00"));
        assert_eq!(found.colleagues, vec!["G.C. MORA, L."]);
        assert_eq!(found.date.as_deref(), Some("2024-03-15"));
        assert!(found.service.is_none());
    }

    #[test]
    fn outgoing_entry_reports_service_and_section_colleagues() {
        let found = lookup_in_roster(&roster(), "Perez M", &KeywordConfig::default()).unwrap();
        assert_eq!(found.service.as_deref(), Some("PUERTAS"));
        assert_eq!(found.colleagues, vec!["G.C. GIL, F."]);
        assert_eq!(found.raw_context.as_deref(), Some("(OUTGOING PUERTAS) SGT PEREZ, M."));
    }

    #[test]
    fn title_without_hours_leaves_times_empty() {
        let found = lookup_in_roster(&roster(), "Nuñez", &KeywordConfig::default()).unwrap();
        assert_eq!(found.shift.as_deref(), Some("TURNO ÚNICO"));
        assert!(found.start_time.is_none());
        assert!(found.colleagues.is_empty());
    }

    #[test]
    fn tag_words_do_not_match_names() {
        assert!(lookup_in_roster(&roster(), "PUERTAS", &KeywordConfig::default()).is_none());
        assert!(lookup_in_roster(&roster(), "OUTGOING", &KeywordConfig::default()).is_none());
    }

    #[test]
    fn missing_or_blank_name_is_none() {
        assert!(lookup_in_roster(&roster(), "GARCIA", &KeywordConfig::default()).is_none());
        assert!(lookup_in_roster(&roster(), "  ,. ", &KeywordConfig::default()).is_none());
    }

    #[test]
    fn unstructured_roster_never_reports_a_shift() {
        let mut column = RosterColumn::new("TEXTO DETECTADO (SIN FORMATO)", None);
        column.entries = vec![
            "SERVICIOS PARA EL DIA 15 DE MARZO".into(),
            "MAÑANA TARDE NOCHE".into(),
            "G.C. LOPEZ, J. CABO RUIZ, A. SGT PEREZ, M.".into(),
        ];
        let mut raw = RosterDocument::new(
            NaiveDate::from_ymd_opt(2024, 3, 15),
            vec![column],
            String::new(),
        );
        raw.layout = RosterLayout::RawText;

        assert!(lookup_in_roster(&raw, "RUIZ", &KeywordConfig::default()).is_none());
    }

    #[test]
    fn parses_overnight_hours() {
        assert_eq!(
            shift_hours("NOCHE (22-06)"),
            Some(("22:00".to_string(), "06:00".to_string()))
        );
        assert_eq!(shift_hours("NOCHE"), None);
    }
}
