//! Cell values and coercion between sheet text and typed primitives.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One grid cell as seen by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Blank,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Self::Blank => true,
            Self::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    /// Trimmed text content, `None` for blanks.
    pub fn as_trimmed_text(&self) -> Option<String> {
        match self {
            Self::Blank => None,
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) => Some(format_number(*n)),
            Self::Text(text) => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.trim().is_empty() {
            Self::Blank
        } else {
            Self::Text(value.to_string())
        }
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Truthy sheet markers, case-insensitive.
const TRUE_MARKERS: &[&str] = &["true", "yes", "y", "1", "✅", "✔", "ok"];
const FALSE_MARKERS: &[&str] = &["false", "no", "n", "0", "❌", "✖"];

/// Parse a cell as a boolean; unknown text is `None` rather than false.
pub fn parse_bool(cell: &CellValue) -> Option<bool> {
    match cell {
        CellValue::Bool(b) => Some(*b),
        CellValue::Number(n) => Some(*n != 0.0),
        _ => {
            let text = cell.as_trimmed_text()?.to_lowercase();
            if TRUE_MARKERS.contains(&text.as_str()) {
                Some(true)
            } else if FALSE_MARKERS.contains(&text.as_str()) {
                Some(false)
            } else {
                None
            }
        }
    }
}

/// Parse a cell as a float: strip, parse, else `None`. Thousands separators
/// and currency junk are not honored; the sheet is expected to hold plain
/// numbers.
pub fn parse_f64(cell: &CellValue) -> Option<f64> {
    match cell {
        CellValue::Number(n) => Some(*n),
        CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => cell.as_trimmed_text()?.parse().ok(),
    }
}

/// Integer tokens; fractional cells are truncated toward zero.
pub fn parse_i64(cell: &CellValue) -> Option<i64> {
    parse_f64(cell).map(|v| v as i64)
}

/// Date format ladder tried in order.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%m/%d/%Y"];

/// Parse a cell as a date using the format ladder.
pub fn parse_date(cell: &CellValue) -> Option<NaiveDate> {
    let text = cell.as_trimmed_text()?;
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&text, format) {
            return Some(date);
        }
    }
    None
}

/// Parse a declared-JSON cell into a serde value.
pub fn parse_json(cell: &CellValue) -> Option<serde_json::Value> {
    let text = cell.as_trimmed_text()?;
    serde_json::from_str(&text).ok()
}

/// Sheet-safe scalar conversion for writers.
pub fn date_cell(date: NaiveDate) -> CellValue {
    CellValue::Text(date.format("%Y-%m-%d").to_string())
}

pub fn datetime_cell(at: DateTime<Utc>) -> CellValue {
    CellValue::Text(at.to_rfc3339())
}

pub fn bool_cell(value: bool) -> CellValue {
    CellValue::Bool(value)
}

pub fn opt_text_cell(value: Option<&str>) -> CellValue {
    value.map(CellValue::text).unwrap_or(CellValue::Blank)
}

pub fn opt_number_cell(value: Option<f64>) -> CellValue {
    value.map(CellValue::Number).unwrap_or(CellValue::Blank)
}

/// Lists and maps become JSON strings on the sheet.
pub fn json_cell(value: &serde_json::Value) -> CellValue {
    CellValue::Text(value.to_string())
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_markers() {
        for marker in ["true", "YES", "y", "1", "✅", "✔", "ok"] {
            assert_eq!(parse_bool(&CellValue::text(marker)), Some(true), "{marker}");
        }
        assert_eq!(parse_bool(&CellValue::text("no")), Some(false));
        assert_eq!(parse_bool(&CellValue::text("maybe")), None);
        assert_eq!(parse_bool(&CellValue::Blank), None);
        assert_eq!(parse_bool(&CellValue::Number(1.0)), Some(true));
    }

    #[test]
    fn float_parsing_strips_whitespace() {
        assert_eq!(parse_f64(&CellValue::text(" 3.5 ")), Some(3.5));
        assert_eq!(parse_f64(&CellValue::text("abc")), None);
        assert_eq!(parse_f64(&CellValue::Blank), None);
        assert_eq!(parse_f64(&CellValue::Number(2.0)), Some(2.0));
    }

    #[test]
    fn date_ladder() {
        let expected = NaiveDate::from_ymd_opt(2026, 5, 31).unwrap();
        for raw in ["2026-05-31", "31/05/2026", "31-05-2026", "05/31/2026"] {
            assert_eq!(parse_date(&CellValue::text(raw)), Some(expected), "{raw}");
        }
        assert_eq!(parse_date(&CellValue::text("31.05.2026")), None);
    }

    #[test]
    fn ambiguous_dates_prefer_european_order() {
        // 01/02 could be Feb 1st or Jan 2nd; the ladder tries %d/%m/%Y first.
        let parsed = parse_date(&CellValue::text("01/02/2026")).unwrap();
        assert_eq!(parsed, NaiveDate::from_ymd_opt(2026, 2, 1).unwrap());
    }

    #[test]
    fn blank_detection_covers_whitespace_text() {
        assert!(CellValue::Blank.is_blank());
        assert!(CellValue::text("   ").is_blank());
        assert!(!CellValue::Number(0.0).is_blank());
    }

    #[test]
    fn number_text_is_integral_when_possible() {
        assert_eq!(CellValue::Number(20.0).as_trimmed_text().unwrap(), "20");
        assert_eq!(CellValue::Number(2.5).as_trimmed_text().unwrap(), "2.5");
    }

    #[test]
    fn json_cells_round_trip() {
        let value = serde_json::json!({"revenue": 85.5});
        let cell = json_cell(&value);
        assert_eq!(parse_json(&cell), Some(value));
        assert_eq!(parse_json(&CellValue::text("{broken")), None);
    }
}
