use chrono::NaiveDate;
use serde_json::{Map, Value};

use super::CloudError;
use crate::pipeline::extraction::types::{RosterColumn, ShiftLookup};

/// Roster as answered by a vision model, before it becomes a document.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionRoster {
    /// `None` when the model answered `null` or an unreadable date.
    pub date: Option<NaiveDate>,
    pub columns: Vec<RosterColumn>,
}

/// Extract a JSON block from model output.
/// Handles responses that include text or code fences around the JSON.
pub fn extract_json_block(response: &str) -> Result<&str, CloudError> {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let after_fence = &trimmed[start + 7..];
        if let Some(end) = after_fence.find("```") {
            return Ok(after_fence[..end].trim());
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        if let Some(end) = after_fence.find("```") {
            let block = after_fence[..end].trim();
            if block.starts_with('{') {
                return Ok(block);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return Ok(&trimmed[start..=end]);
        }
    }

    Err(CloudError::MalformedResponse(
        "No JSON object found in model response".to_string(),
    ))
}

fn parse_object(response: &str) -> Result<Map<String, Value>, CloudError> {
    let block = extract_json_block(response)?;
    match serde_json::from_str::<Value>(block) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CloudError::MalformedResponse(
            "Model response is not a JSON object".to_string(),
        )),
        Err(e) => Err(CloudError::MalformedResponse(format!("Invalid JSON: {e}"))),
    }
}

fn parse_date(value: &Value) -> Option<NaiveDate> {
    let text = value.as_str()?.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d/%m/%Y"))
        .ok()
}

/// Validate `{ "date": ..., "columns": [{ "title", "names": [] }] }`.
///
/// Both keys must be present; `date` may be null. Blank names are dropped.
pub fn parse_roster_json(response: &str) -> Result<VisionRoster, CloudError> {
    let map = parse_object(response)?;

    let date_value = map
        .get("date")
        .ok_or_else(|| CloudError::MalformedResponse("missing \"date\"".to_string()))?;
    let columns_value = map
        .get("columns")
        .and_then(Value::as_array)
        .ok_or_else(|| CloudError::MalformedResponse("missing \"columns\" array".to_string()))?;

    let mut columns = Vec::with_capacity(columns_value.len());
    for col in columns_value {
        let title = col
            .get("title")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| CloudError::MalformedResponse("column without title".to_string()))?;

        let mut column = RosterColumn::new(title, None);
        column.entries = col
            .get("names")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        columns.push(column);
    }

    Ok(VisionRoster {
        date: parse_date(date_value),
        columns,
    })
}

/// Validate a targeted-lookup answer. `found` is required; a positive
/// answer must also name the shift.
pub fn parse_lookup_json(response: &str, target_name: &str) -> Result<ShiftLookup, CloudError> {
    let map = parse_object(response)?;

    if !map.get("found").is_some_and(Value::is_boolean) {
        return Err(CloudError::MalformedResponse(
            "missing boolean \"found\"".to_string(),
        ));
    }

    let mut lookup: ShiftLookup = serde_json::from_value(Value::Object(map))
        .map_err(|e| CloudError::MalformedResponse(format!("Invalid lookup fields: {e}")))?;

    if lookup.found && lookup.shift.as_deref().map_or(true, |s| s.trim().is_empty()) {
        return Err(CloudError::MalformedResponse(
            "lookup marked found without a shift".to_string(),
        ));
    }

    if lookup.target_name.trim().is_empty() {
        lookup.target_name = target_name.trim().to_string();
    }
    lookup.colleagues.retain(|c| !c.trim().is_empty());
    Ok(lookup)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let text = "Aquí está:\n```json\n{\"date\": null, \"columns\": []}\n```\nFin.";
        assert_eq!(extract_json_block(text).unwrap(), "{\"date\": null, \"columns\": []}");
    }

    #[test]
    fn strips_bare_fence_and_surrounding_text() {
        assert_eq!(extract_json_block("```\n{\"a\": 1}\n```").unwrap(), "{\"a\": 1}");
        assert_eq!(extract_json_block("Resultado: {\"a\": 1} ok").unwrap(), "{\"a\": 1}");
        assert!(extract_json_block("no hay nada").is_err());
    }

    #[test]
    fn parses_roster() {
        let roster = parse_roster_json(
            r#"```json
{
  "date": "2024-03-15",
  "columns": [
    {"title": "MAÑANA (06-14)", "names": ["G.C. LOPEZ, J.", "  ", "CABO RUIZ"]},
    {"title": "NOCHE (22-06)", "names": []}
  ]
}
```"#,
        )
        .unwrap();

        assert_eq!(roster.date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(roster.columns.len(), 2);
        assert_eq!(roster.columns[0].entries, vec!["G.C. LOPEZ, J.", "CABO RUIZ"]);
        assert!(roster.columns[1].entries.is_empty());
    }

    #[test]
    fn null_or_odd_date_is_accepted() {
        let r = parse_roster_json(r#"{"date": null, "columns": [{"title": "T", "names": ["A"]}]}"#).unwrap();
        assert_eq!(r.date, None);
        let r = parse_roster_json(r#"{"date": "15/03/2024", "columns": []}"#).unwrap();
        assert_eq!(r.date, NaiveDate::from_ymd_opt(2024, 3, 15));
        let r = parse_roster_json(r#"{"date": "mañana", "columns": []}"#).unwrap();
        assert_eq!(r.date, None);
    }

    #[test]
    fn rejects_missing_required_fields() {
        assert!(matches!(
            parse_roster_json(r#"{"columns": []}"#),
            Err(CloudError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_roster_json(r#"{"date": null, "columns": {}}"#),
            Err(CloudError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_roster_json(r#"{"date": null, "columns": [{"names": ["A"]}]}"#),
            Err(CloudError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_roster_json("[1, 2]"),
            Err(CloudError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_roster_json("{not json}"),
            Err(CloudError::MalformedResponse(_))
        ));
    }

    #[test]
    fn parses_positive_lookup() {
        let lookup = parse_lookup_json(
            r#"{"found": true, "date": "2024-03-15", "shift": "TARDE", "startTime": "14:00",
                "endTime": "22:00", "colleagues": ["CABO RUIZ", ""]}"#,
            "Lopez",
        )
        .unwrap();
        assert!(lookup.found);
        assert_eq!(lookup.target_name, "Lopez");
        assert_eq!(lookup.start_time.as_deref(), Some("14:00"));
        assert_eq!(lookup.colleagues, vec!["CABO RUIZ"]);
    }

    #[test]
    fn negative_lookup_needs_only_found() {
        let lookup = parse_lookup_json(r#"{"found": false}"#, "Lopez").unwrap();
        assert!(!lookup.found);
    }

    #[test]
    fn rejects_invalid_lookup() {
        assert!(parse_lookup_json(r#"{"shift": "TARDE"}"#, "x").is_err());
        assert!(parse_lookup_json(r#"{"found": "yes"}"#, "x").is_err());
        assert!(parse_lookup_json(r#"{"found": true}"#, "x").is_err());
        assert!(parse_lookup_json(r#"{"found": true, "shift": "T", "colleagues": "A"}"#, "x").is_err());
    }
}
