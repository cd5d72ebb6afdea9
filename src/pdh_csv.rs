//! PDH-CSV parsing for decoder output
//!
//! The decoder writes one header row (timestamp label followed by counter
//! paths) and one row per capture interval. Every cell is usually quoted;
//! invalid samples are written as a blank (`" "`) cell.

use crate::error::{CaptureError, Result};
use chrono::NaiveDateTime;

/// Decoder output split into header and rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PdhTable {
    /// Counter path cells (the leading timestamp label is dropped)
    pub counters: Vec<String>,
    /// Data rows, each `[timestamp, value, value, ...]`
    pub rows: Vec<Vec<String>>,
}

/// Parse decoder CSV output
///
/// Fails with `Import` when there is no header or the header names no
/// counters. Blank lines are ignored.
pub fn parse_table(text: &str) -> Result<PdhTable> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| CaptureError::Import("decoder output is empty".to_string()))?;
    let mut header = split_line(header);
    if header.len() < 2 {
        return Err(CaptureError::Import(format!(
            "header has {} column(s), expected a timestamp and at least one counter",
            header.len()
        )));
    }
    header.remove(0);

    let rows = lines.map(split_line).collect();
    Ok(PdhTable {
        counters: header,
        rows,
    })
}

/// Split one CSV line into unquoted fields
///
/// Handles `""` escapes inside quoted fields.
pub fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches(['\r', '\n']).chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

/// Parse a cooked counter value; blank, non-numeric and non-finite cells are `None`
pub fn parse_value(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// PDH timestamp layout, e.g. `01/15/2024 10:00:15.000`
const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M:%S%.f";

/// Parse a PDH timestamp into seconds since 1970-01-01
///
/// Only differences between timestamps are used, so the time zone the
/// decoder wrote is irrelevant. Impossible dates are rejected.
pub fn parse_timestamp(cell: &str) -> Option<f64> {
    let parsed = NaiveDateTime::parse_from_str(cell.trim(), TIMESTAMP_FORMAT).ok()?;
    Some(parsed.and_utc().timestamp_millis() as f64 / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_quoted_fields() {
        let fields = split_line(r#""a","b,c","d ""q""",e"#);
        assert_eq!(fields, vec!["a", "b,c", r#"d "q""#, "e"]);
    }

    #[test]
    fn test_split_trailing_empty_field() {
        assert_eq!(split_line("\"1\",\" \",\r"), vec!["1", " ", ""]);
    }

    #[test]
    fn test_parse_table() {
        let text = concat!(
            "\u{feff}\"(PDH-CSV 4.0) (UTC)(0)\",\"\\\\H\\Process(a)\\% Processor Time\"\r\n",
            "\"01/15/2024 10:00:00.000\",\"12.5\"\r\n",
            "\r\n",
            "\"01/15/2024 10:00:15.000\",\" \"\r\n",
        );
        let table = parse_table(text).unwrap();
        assert_eq!(table.counters, vec![r"\\H\Process(a)\% Processor Time"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1][1], " ");
    }

    #[test]
    fn test_parse_table_rejects_empty() {
        assert!(matches!(parse_table(""), Err(CaptureError::Import(_))));
        assert!(matches!(
            parse_table("\"(PDH-CSV 4.0)\"\n"),
            Err(CaptureError::Import(_))
        ));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("12.5"), Some(12.5));
        assert_eq!(parse_value(" 7 "), Some(7.0));
        assert_eq!(parse_value(" "), None);
        assert_eq!(parse_value("-1.#IND"), None);
        assert_eq!(parse_value("NaN"), None);
        assert_eq!(parse_value("inf"), None);
    }

    #[test]
    fn test_parse_timestamp_epoch() {
        assert_eq!(parse_timestamp("01/01/1970 00:00:00.000"), Some(0.0));
        assert_eq!(parse_timestamp("01/02/1970 00:00:01.500"), Some(86_401.5));
    }

    #[test]
    fn test_parse_timestamp_differences() {
        let a = parse_timestamp("02/28/2024 23:59:45.000").unwrap();
        let b = parse_timestamp("02/29/2024 00:00:00.000").unwrap();
        assert!((b - a - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert_eq!(parse_timestamp("not a time"), None);
        assert_eq!(parse_timestamp("13/01/2024 00:00:00"), None);
        assert_eq!(parse_timestamp("01/01/2024 25:00:00"), None);
    }

    #[test]
    fn test_parse_timestamp_rejects_impossible_dates() {
        assert_eq!(parse_timestamp("02/31/2024 00:00:00.000"), None);
        assert_eq!(parse_timestamp("02/29/2023 00:00:00.000"), None);
        assert_eq!(parse_timestamp("01/01/9223372036854775807 00:00:00.000"), None);
        assert_eq!(parse_timestamp("01/01/99999999999999999 00:00:00.000"), None);
    }

    #[test]
    fn test_parse_timestamp_without_fraction() {
        assert_eq!(parse_timestamp(" 01/01/1970 00:01:00 "), Some(60.0));
    }
}
