use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;
use tracing::debug;

use crate::config::KeywordConfig;

/// `<day> DE <month>` with an optional `DE <year>`.
static LONG_FORM_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d{1,2})\s+DE\s+([A-ZÑ]+)(?:\s+DE\s+(\d{4}))?")
        .expect("long-form date pattern is valid")
});

/// First long-form date in the leading `scan_chars` characters of `text`.
///
/// The stated year wins; otherwise `current_year`. Unknown month names and
/// impossible calendar dates are skipped.
pub fn find_date(
    text: &str,
    keywords: &KeywordConfig,
    current_year: i32,
    scan_chars: usize,
) -> Option<NaiveDate> {
    let head: String = text.to_uppercase().chars().take(scan_chars).collect();

    LONG_FORM_DATE.captures_iter(&head).find_map(|caps| {
        let day: u32 = caps.get(1)?.as_str().parse().ok()?;
        let month = keywords.month_number(caps.get(2)?.as_str())?;
        let year = match caps.get(3) {
            Some(y) => y.as_str().parse().ok()?,
            None => current_year,
        };
        NaiveDate::from_ymd_opt(year, month, day)
    })
}

/// Roster date, defaulting to `today` when none can be read.
pub fn extract_date(
    text: &str,
    keywords: &KeywordConfig,
    today: NaiveDate,
    scan_chars: usize,
) -> NaiveDate {
    match find_date(text, keywords, today.year(), scan_chars) {
        Some(date) => date,
        None => {
            debug!(default = %today, "No roster date found, using today");
            today
        }
    }
}

/// Current local date.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}
